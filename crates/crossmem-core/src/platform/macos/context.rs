//! # macOS Thread State
//!
//! Converts between Mach thread state flavors and [`ThreadContext`].
//!
//! - **ARM64**: `ARM_THREAD_STATE64` (flavor 6, 68 `natural_t`)
//! - **x86-64**: `X86_THREAD_STATE64` (flavor 4, 42 `natural_t`)
//!
//! `general` holds X0-X28 and LR on ARM64, and RAX, RBX, RCX, RDX, RSI, RDI,
//! R8-R15 on x86-64. PC, SP, FP and the status register are the control part.
//!
//! ## References
//!
//! - [thread_get_state documentation](https://developer.apple.com/documentation/kernel/1418576-thread_get_state/)
//! - [ARM_THREAD_STATE64 structure](https://opensource.apple.com/source/xnu/xnu-4570.71.2/osfmk/mach/arm/_structs.h)

use libc::{c_int, mach_msg_type_number_t, natural_t, thread_act_t};
use mach2::kern_return::KERN_SUCCESS;

use crate::error::Result;
use crate::platform::macos::error::MachError;
use crate::platform::macos::ffi;
use crate::types::{Address, ContextFlags, ThreadContext};

#[cfg(target_arch = "aarch64")]
mod arch
{
    use super::*;

    pub const FLAVOR: c_int = 6;
    pub const COUNT: mach_msg_type_number_t = 68;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct State
    {
        pub x: [u64; 29],
        pub fp: u64,
        pub lr: u64,
        pub sp: u64,
        pub pc: u64,
        pub cpsr: u32,
        pub pad: u32,
    }

    pub fn to_context(state: &State) -> ThreadContext
    {
        let mut general = state.x.to_vec();
        general.push(state.lr);
        ThreadContext {
            flags: ContextFlags::FULL,
            pc: Address::from(state.pc),
            sp: Address::from(state.sp),
            fp: Address::from(state.fp),
            general,
            status: u64::from(state.cpsr),
        }
    }

    pub fn apply(state: &mut State, context: &ThreadContext)
    {
        if context.flags.contains(ContextFlags::CONTROL) {
            state.pc = context.pc.value();
            state.sp = context.sp.value();
            state.fp = context.fp.value();
            state.cpsr = context.status as u32;
        }
        if context.flags.contains(ContextFlags::INTEGER) {
            for (slot, value) in state.x.iter_mut().zip(context.general.iter()) {
                *slot = *value;
            }
            if let Some(lr) = context.general.get(29) {
                state.lr = *lr;
            }
        }
    }

    pub fn set_argument(state: &mut State, argument: u64)
    {
        state.x[0] = argument;
        state.lr = 0;
    }
}

#[cfg(target_arch = "x86_64")]
mod arch
{
    use super::*;

    pub const FLAVOR: c_int = 4;
    pub const COUNT: mach_msg_type_number_t = 42;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct State
    {
        pub rax: u64,
        pub rbx: u64,
        pub rcx: u64,
        pub rdx: u64,
        pub rdi: u64,
        pub rsi: u64,
        pub rbp: u64,
        pub rsp: u64,
        pub r8: u64,
        pub r9: u64,
        pub r10: u64,
        pub r11: u64,
        pub r12: u64,
        pub r13: u64,
        pub r14: u64,
        pub r15: u64,
        pub rip: u64,
        pub rflags: u64,
        pub cs: u64,
        pub fs: u64,
        pub gs: u64,
    }

    pub fn to_context(state: &State) -> ThreadContext
    {
        ThreadContext {
            flags: ContextFlags::FULL,
            pc: Address::from(state.rip),
            sp: Address::from(state.rsp),
            fp: Address::from(state.rbp),
            general: vec![
                state.rax, state.rbx, state.rcx, state.rdx, state.rsi, state.rdi, state.r8, state.r9, state.r10, state.r11,
                state.r12, state.r13, state.r14, state.r15,
            ],
            status: state.rflags,
        }
    }

    pub fn apply(state: &mut State, context: &ThreadContext)
    {
        if context.flags.contains(ContextFlags::CONTROL) {
            state.rip = context.pc.value();
            state.rsp = context.sp.value();
            state.rbp = context.fp.value();
            state.rflags = context.status;
        }
        if context.flags.contains(ContextFlags::INTEGER) {
            let slots = [
                &mut state.rax,
                &mut state.rbx,
                &mut state.rcx,
                &mut state.rdx,
                &mut state.rsi,
                &mut state.rdi,
                &mut state.r8,
                &mut state.r9,
                &mut state.r10,
                &mut state.r11,
                &mut state.r12,
                &mut state.r13,
                &mut state.r14,
                &mut state.r15,
            ];
            for (slot, value) in slots.into_iter().zip(context.general.iter()) {
                *slot = *value;
            }
        }
    }

    pub fn set_argument(state: &mut State, argument: u64)
    {
        state.rdi = argument;
    }
}

fn get_state(thread: thread_act_t) -> Result<arch::State>
{
    let mut state = arch::State::default();
    let mut count = arch::COUNT;
    // SAFETY: `state` is a repr(C) mirror of the flavor, `count` words long.
    let result = unsafe {
        ffi::thread_get_state(
            thread,
            arch::FLAVOR,
            (&mut state as *mut arch::State).cast::<natural_t>(),
            &mut count,
        )
    };
    if result != KERN_SUCCESS {
        return Err(MachError::from(result).into());
    }
    Ok(state)
}

fn set_state(thread: thread_act_t, state: &arch::State) -> Result<()>
{
    // SAFETY: as in `get_state`.
    let result = unsafe {
        ffi::thread_set_state(
            thread,
            arch::FLAVOR,
            (state as *const arch::State).cast::<natural_t>(),
            arch::COUNT,
        )
    };
    if result != KERN_SUCCESS {
        return Err(MachError::from(result).into());
    }
    Ok(())
}

/// Full register context of `thread`.
///
/// ## Errors
///
/// - `MachError`: `thread_get_state()` failed
pub fn read_context(thread: thread_act_t) -> Result<ThreadContext>
{
    Ok(arch::to_context(&get_state(thread)?))
}

/// Write the parts of `context` selected by its flags to `thread`.
///
/// ## Errors
///
/// - `MachError`: `thread_get_state()` or `thread_set_state()` failed
pub fn write_context(thread: thread_act_t, context: &ThreadContext) -> Result<()>
{
    let mut state = get_state(thread)?;
    arch::apply(&mut state, context);
    set_state(thread, &state)
}

/// Point a fresh thread at `start` with `argument` in the first argument
/// register and `stack_top` as its stack.
///
/// ## Errors
///
/// - `MachError`: `thread_set_state()` failed
pub fn prime_thread(thread: thread_act_t, start: Address, argument: u64, stack_top: Address) -> Result<()>
{
    let mut state = arch::State::default();
    let context = ThreadContext {
        flags: ContextFlags::CONTROL,
        pc: start,
        sp: stack_top,
        fp: Address::ZERO,
        general: Vec::new(),
        status: 0,
    };
    arch::apply(&mut state, &context);
    arch::set_argument(&mut state, argument);
    set_state(thread, &state)
}
