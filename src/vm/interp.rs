//! The bytecode interpreter.
//!
//! One invocation runs single-threaded over a raw byte frame: on entry the
//! parameter slots are populated, then a tight decode loop matches each
//! opcode and executes its handler inline. `Call` allocates a fresh frame,
//! copies argument values into the callee's parameter slots, and recurses;
//! `Return` unwinds one frame. Parallel opcodes (`ParallelScanTable`, the
//! parallel builds) block until their workers finish.
//!
//! Frame slots are untyped bytes; operands resolve to addresses (`Address`
//! mode names the slot, `Value` mode chases the pointer stored there), and
//! every handler knows the concrete types it reads and writes at those
//! addresses. That raw-memory discipline is confined to this module and the
//! row stores.

use std::sync::Arc;

use tracing::trace;

use super::bytecodes::Bytecode;
use super::function_info::{FunctionId, FunctionInfo, LocalVar};
use super::module::BytecodeModule;
use crate::sql::aggregation_hash_table::{
    AggregationHashTable, AhtIterator, AhtOverflowPartitionIterator,
};
use crate::sql::error::{ExecutionError, Result};
use crate::sql::exec::ExecutionContext;
use crate::sql::filter_manager::FilterManager;
use crate::sql::functions::numeric;
use crate::sql::join_hash_table::{HashTableEntryIterator, JoinHashTable};
use crate::sql::runtime_types::{Date, Timestamp, VarlenEntry};
use crate::sql::sorter::{Sorter, SorterIterator};
use crate::sql::table_vector_iterator::TableVectorIterator;
use crate::sql::thread_state::ThreadStateContainer;
use crate::sql::value::{BoolVal, DateVal, Integer, Real, StringVal};
use crate::sql::vpi::VectorProjectionIterator;
use crate::sql::Catalog;
use crate::util::hashing;

/// Executes functions of one compiled module against a catalog.
#[derive(Clone)]
pub struct VM {
    module: Arc<BytecodeModule>,
    catalog: Arc<Catalog>,
}

/// A stack frame: raw storage, 16-byte aligned.
struct Frame {
    data: Vec<u128>,
}

impl Frame {
    fn new(frame_size: u32) -> Self {
        Frame {
            data: vec![0u128; (frame_size as usize).div_ceil(16).max(1)],
        }
    }

    fn base(&mut self) -> *mut u8 {
        self.data.as_mut_ptr().cast()
    }
}

/// Resolve an operand to the address it names.
#[inline]
unsafe fn resolve(frame: *mut u8, local: LocalVar) -> *mut u8 {
    let slot = frame.add(local.offset() as usize);
    match local.mode() {
        super::function_info::AddressMode::Address => slot,
        super::function_info::AddressMode::Value => slot.cast::<usize>().read_unaligned() as *mut u8,
    }
}

#[inline]
unsafe fn read<T: Copy>(frame: *mut u8, local: LocalVar) -> T {
    resolve(frame, local).cast::<T>().read_unaligned()
}

#[inline]
unsafe fn write<T: Copy>(frame: *mut u8, local: LocalVar, value: T) {
    resolve(frame, local).cast::<T>().write_unaligned(value);
}

/// Read a pointer argument out of its slot.
#[inline]
unsafe fn read_ptr<T>(frame: *mut u8, local: LocalVar) -> *mut T {
    read::<usize>(frame, local) as *mut T
}

impl VM {
    pub fn new(module: Arc<BytecodeModule>, catalog: Arc<Catalog>) -> Self {
        VM { module, catalog }
    }

    pub fn module(&self) -> &BytecodeModule {
        &self.module
    }

    /// Invoke a function by name. `args` are raw word-size values written
    /// into the parameter slots in order; value-returning functions take
    /// their result address as the leading hidden argument.
    pub fn invoke_by_name(&self, name: &str, args: &[usize]) -> Result<()> {
        let func = self
            .module
            .function_by_name(name)
            .ok_or_else(|| ExecutionError::MissingFunction(name.to_string()))?;
        self.invoke(func.id(), args)
    }

    /// Invoke a function by id with word-size arguments.
    pub fn invoke(&self, func_id: FunctionId, args: &[usize]) -> Result<()> {
        let func = self
            .module
            .function(func_id)
            .ok_or_else(|| ExecutionError::MissingFunction(format!("#{func_id}")))?;
        let mut frame = Frame::new(func.frame_size());
        let base = frame.base();
        for (i, &arg) in args.iter().enumerate() {
            let info = &func.locals()[i];
            debug_assert_eq!(info.size, 8, "top-level arguments are word-size");
            unsafe {
                base.add(info.offset as usize)
                    .cast::<usize>()
                    .write_unaligned(arg);
            }
        }
        self.run(func, base)
    }

    /// The decode/dispatch loop for one frame.
    #[allow(clippy::too_many_lines)]
    fn run(&self, func: &FunctionInfo, frame: *mut u8) -> Result<()> {
        let code = self.module.bytecode_for(func);
        let mut ip = 0usize;

        macro_rules! read_u8 {
            () => {{
                let v = code[ip];
                ip += 1;
                v
            }};
        }
        macro_rules! read_u16 {
            () => {{
                let v = u16::from_le_bytes([code[ip], code[ip + 1]]);
                ip += 2;
                v
            }};
        }
        macro_rules! read_u32 {
            () => {{
                let v = u32::from_le_bytes([code[ip], code[ip + 1], code[ip + 2], code[ip + 3]]);
                ip += 4;
                v
            }};
        }
        macro_rules! read_u64 {
            () => {{
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&code[ip..ip + 8]);
                ip += 8;
                u64::from_le_bytes(buf)
            }};
        }
        macro_rules! local {
            () => {
                LocalVar::decode(read_u32!())
            };
        }
        macro_rules! jump {
            () => {{
                let base = ip;
                let delta = read_u32!() as i32;
                (base as i64 + i64::from(delta)) as usize
            }};
        }
        macro_rules! arith {
            ($ty:ty, $f:expr) => {{
                let dst = local!();
                let a = local!();
                let b = local!();
                let f: fn($ty, $ty) -> $ty = $f;
                unsafe {
                    let x = read::<$ty>(frame, a);
                    let y = read::<$ty>(frame, b);
                    write::<$ty>(frame, dst, f(x, y));
                }
            }};
        }
        macro_rules! arith_div {
            ($ty:ty, $zero:expr, $f:expr) => {{
                let dst = local!();
                let a = local!();
                let b = local!();
                let f: fn($ty, $ty) -> $ty = $f;
                unsafe {
                    let x = read::<$ty>(frame, a);
                    let y = read::<$ty>(frame, b);
                    if y == $zero {
                        return Err(ExecutionError::DivisionByZero);
                    }
                    write::<$ty>(frame, dst, f(x, y));
                }
            }};
        }
        macro_rules! unary {
            ($ty:ty, $f:expr) => {{
                let dst = local!();
                let a = local!();
                let f: fn($ty) -> $ty = $f;
                unsafe {
                    let x = read::<$ty>(frame, a);
                    write::<$ty>(frame, dst, f(x));
                }
            }};
        }
        macro_rules! cmp {
            ($ty:ty, $f:expr) => {{
                let dst = local!();
                let a = local!();
                let b = local!();
                let f: fn($ty, $ty) -> bool = $f;
                unsafe {
                    let x = read::<$ty>(frame, a);
                    let y = read::<$ty>(frame, b);
                    write::<u8>(frame, dst, u8::from(f(x, y)));
                }
            }};
        }
        macro_rules! sql_arith {
            ($valty:ty, $payload:ty, $f:expr, $check_zero:expr) => {{
                let dst = local!();
                let a = local!();
                let b = local!();
                let f: fn($payload, $payload) -> $payload = $f;
                unsafe {
                    let x = read::<$valty>(frame, a);
                    let y = read::<$valty>(frame, b);
                    let result = if x.is_null || y.is_null {
                        <$valty>::null()
                    } else {
                        if $check_zero && y.value == Default::default() {
                            return Err(ExecutionError::DivisionByZero);
                        }
                        <$valty>::new(f(x.value, y.value))
                    };
                    write::<$valty>(frame, dst, result);
                }
            }};
        }
        macro_rules! sql_cmp {
            ($valty:ty, $f:expr) => {{
                let dst = local!();
                let a = local!();
                let b = local!();
                unsafe {
                    let x = read::<$valty>(frame, a);
                    let y = read::<$valty>(frame, b);
                    let result = if x.is_null || y.is_null {
                        BoolVal::null()
                    } else {
                        BoolVal::new($f(&x.value, &y.value))
                    };
                    write::<BoolVal>(frame, dst, result);
                }
            }};
        }
        macro_rules! sql_unary_real {
            ($f:expr) => {{
                let dst = local!();
                let a = local!();
                unsafe {
                    let x = read::<Real>(frame, a);
                    write::<Real>(frame, dst, $f(x));
                }
            }};
        }

        loop {
            let raw = u16::from_le_bytes([code[ip], code[ip + 1]]);
            ip += 2;
            let op = Bytecode::from_u16(raw).ok_or(ExecutionError::MalformedBytecode(ip - 2))?;
            trace!(func = func.name(), pc = ip - 2, op = op.name());

            match op {
                // ---------------------------------------------------
                // Control flow
                // ---------------------------------------------------
                Bytecode::Jump => {
                    ip = jump!();
                }
                Bytecode::JumpIfTrue => {
                    let cond = local!();
                    let target = jump!();
                    if unsafe { read::<u8>(frame, cond) } != 0 {
                        ip = target;
                    }
                }
                Bytecode::JumpIfFalse => {
                    let cond = local!();
                    let target = jump!();
                    if unsafe { read::<u8>(frame, cond) } == 0 {
                        ip = target;
                    }
                }
                Bytecode::Return => return Ok(()),
                Bytecode::Call => {
                    let callee_id = read_u16!();
                    let argc = read_u16!() as usize;
                    let callee = self
                        .module
                        .function(callee_id)
                        .ok_or_else(|| ExecutionError::MissingFunction(format!("#{callee_id}")))?;
                    let mut callee_frame = Frame::new(callee.frame_size());
                    let callee_base = callee_frame.base();
                    for i in 0..argc {
                        let operand = local!();
                        let param = &callee.locals()[i];
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                resolve(frame, operand),
                                callee_base.add(param.offset as usize),
                                param.size as usize,
                            );
                        }
                    }
                    self.run(callee, callee_base)?;
                }

                // ---------------------------------------------------
                // Memory
                // ---------------------------------------------------
                Bytecode::Deref1 | Bytecode::Assign1 => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<u8>(frame, dst, read::<u8>(frame, src)) }
                }
                Bytecode::Deref2 | Bytecode::Assign2 => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<u16>(frame, dst, read::<u16>(frame, src)) }
                }
                Bytecode::Deref4 | Bytecode::Assign4 => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<u32>(frame, dst, read::<u32>(frame, src)) }
                }
                Bytecode::Deref8 | Bytecode::Assign8 => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<u64>(frame, dst, read::<u64>(frame, src)) }
                }
                Bytecode::DerefN | Bytecode::AssignN => {
                    let dst = local!();
                    let src = local!();
                    let len = read_u32!() as usize;
                    unsafe {
                        std::ptr::copy_nonoverlapping(resolve(frame, src), resolve(frame, dst), len);
                    }
                }
                Bytecode::AssignImm1 => {
                    let dst = local!();
                    let v = read_u8!() as i8;
                    unsafe { write::<i8>(frame, dst, v) }
                }
                Bytecode::AssignImm2 => {
                    let dst = local!();
                    let v = read_u16!() as i16;
                    unsafe { write::<i16>(frame, dst, v) }
                }
                Bytecode::AssignImm4 => {
                    let dst = local!();
                    let v = read_u32!() as i32;
                    unsafe { write::<i32>(frame, dst, v) }
                }
                Bytecode::AssignImm8 => {
                    let dst = local!();
                    let v = read_u64!() as i64;
                    unsafe { write::<i64>(frame, dst, v) }
                }
                Bytecode::AssignImm4F => {
                    let dst = local!();
                    let v = f32::from_bits(read_u32!());
                    unsafe { write::<f32>(frame, dst, v) }
                }
                Bytecode::AssignImm8F => {
                    let dst = local!();
                    let v = f64::from_bits(read_u64!());
                    unsafe { write::<f64>(frame, dst, v) }
                }
                Bytecode::Lea => {
                    let dst = local!();
                    let src = local!();
                    let offset = read_u32!() as usize;
                    unsafe {
                        let address = resolve(frame, src) as usize + offset;
                        write::<usize>(frame, dst, address);
                    }
                }
                Bytecode::LeaScaled => {
                    let dst = local!();
                    let src = local!();
                    let index = local!();
                    let scale = read_u32!() as usize;
                    let offset = read_u32!() as usize;
                    unsafe {
                        let idx = read::<i64>(frame, index) as usize;
                        let address = resolve(frame, src) as usize + idx * scale + offset;
                        write::<usize>(frame, dst, address);
                    }
                }

                // ---------------------------------------------------
                // Primitive arithmetic
                // ---------------------------------------------------
                Bytecode::AddI8 => arith!(i8, |a, b| a.wrapping_add(b)),
                Bytecode::AddI16 => arith!(i16, |a, b| a.wrapping_add(b)),
                Bytecode::AddI32 => arith!(i32, |a, b| a.wrapping_add(b)),
                Bytecode::AddI64 => arith!(i64, |a, b| a.wrapping_add(b)),
                Bytecode::AddU8 => arith!(u8, |a, b| a.wrapping_add(b)),
                Bytecode::AddU16 => arith!(u16, |a, b| a.wrapping_add(b)),
                Bytecode::AddU32 => arith!(u32, |a, b| a.wrapping_add(b)),
                Bytecode::AddU64 => arith!(u64, |a, b| a.wrapping_add(b)),
                Bytecode::AddF32 => arith!(f32, |a, b| a + b),
                Bytecode::AddF64 => arith!(f64, |a, b| a + b),
                Bytecode::SubI8 => arith!(i8, |a, b| a.wrapping_sub(b)),
                Bytecode::SubI16 => arith!(i16, |a, b| a.wrapping_sub(b)),
                Bytecode::SubI32 => arith!(i32, |a, b| a.wrapping_sub(b)),
                Bytecode::SubI64 => arith!(i64, |a, b| a.wrapping_sub(b)),
                Bytecode::SubU8 => arith!(u8, |a, b| a.wrapping_sub(b)),
                Bytecode::SubU16 => arith!(u16, |a, b| a.wrapping_sub(b)),
                Bytecode::SubU32 => arith!(u32, |a, b| a.wrapping_sub(b)),
                Bytecode::SubU64 => arith!(u64, |a, b| a.wrapping_sub(b)),
                Bytecode::SubF32 => arith!(f32, |a, b| a - b),
                Bytecode::SubF64 => arith!(f64, |a, b| a - b),
                Bytecode::MulI8 => arith!(i8, |a, b| a.wrapping_mul(b)),
                Bytecode::MulI16 => arith!(i16, |a, b| a.wrapping_mul(b)),
                Bytecode::MulI32 => arith!(i32, |a, b| a.wrapping_mul(b)),
                Bytecode::MulI64 => arith!(i64, |a, b| a.wrapping_mul(b)),
                Bytecode::MulU8 => arith!(u8, |a, b| a.wrapping_mul(b)),
                Bytecode::MulU16 => arith!(u16, |a, b| a.wrapping_mul(b)),
                Bytecode::MulU32 => arith!(u32, |a, b| a.wrapping_mul(b)),
                Bytecode::MulU64 => arith!(u64, |a, b| a.wrapping_mul(b)),
                Bytecode::MulF32 => arith!(f32, |a, b| a * b),
                Bytecode::MulF64 => arith!(f64, |a, b| a * b),
                Bytecode::DivI8 => arith_div!(i8, 0, |a, b| a.wrapping_div(b)),
                Bytecode::DivI16 => arith_div!(i16, 0, |a, b| a.wrapping_div(b)),
                Bytecode::DivI32 => arith_div!(i32, 0, |a, b| a.wrapping_div(b)),
                Bytecode::DivI64 => arith_div!(i64, 0, |a, b| a.wrapping_div(b)),
                Bytecode::DivU8 => arith_div!(u8, 0, |a, b| a / b),
                Bytecode::DivU16 => arith_div!(u16, 0, |a, b| a / b),
                Bytecode::DivU32 => arith_div!(u32, 0, |a, b| a / b),
                Bytecode::DivU64 => arith_div!(u64, 0, |a, b| a / b),
                Bytecode::DivF32 => arith_div!(f32, 0.0, |a, b| a / b),
                Bytecode::DivF64 => arith_div!(f64, 0.0, |a, b| a / b),
                Bytecode::RemI8 => arith_div!(i8, 0, |a, b| a.wrapping_rem(b)),
                Bytecode::RemI16 => arith_div!(i16, 0, |a, b| a.wrapping_rem(b)),
                Bytecode::RemI32 => arith_div!(i32, 0, |a, b| a.wrapping_rem(b)),
                Bytecode::RemI64 => arith_div!(i64, 0, |a, b| a.wrapping_rem(b)),
                Bytecode::RemU8 => arith_div!(u8, 0, |a, b| a % b),
                Bytecode::RemU16 => arith_div!(u16, 0, |a, b| a % b),
                Bytecode::RemU32 => arith_div!(u32, 0, |a, b| a % b),
                Bytecode::RemU64 => arith_div!(u64, 0, |a, b| a % b),
                Bytecode::RemF32 => arith_div!(f32, 0.0, |a, b| a % b),
                Bytecode::RemF64 => arith_div!(f64, 0.0, |a, b| a % b),
                Bytecode::NegI8 => unary!(i8, |a: i8| a.wrapping_neg()),
                Bytecode::NegI16 => unary!(i16, |a: i16| a.wrapping_neg()),
                Bytecode::NegI32 => unary!(i32, |a: i32| a.wrapping_neg()),
                Bytecode::NegI64 => unary!(i64, |a: i64| a.wrapping_neg()),
                Bytecode::NegF32 => unary!(f32, |a: f32| -a),
                Bytecode::NegF64 => unary!(f64, |a: f64| -a),

                // ---------------------------------------------------
                // Primitive comparisons
                // ---------------------------------------------------
                Bytecode::EqI8 => cmp!(i8, |a, b| a == b),
                Bytecode::EqI16 => cmp!(i16, |a, b| a == b),
                Bytecode::EqI32 => cmp!(i32, |a, b| a == b),
                Bytecode::EqI64 => cmp!(i64, |a, b| a == b),
                Bytecode::EqU8 => cmp!(u8, |a, b| a == b),
                Bytecode::EqU16 => cmp!(u16, |a, b| a == b),
                Bytecode::EqU32 => cmp!(u32, |a, b| a == b),
                Bytecode::EqU64 => cmp!(u64, |a, b| a == b),
                Bytecode::EqF32 => cmp!(f32, |a, b| a == b),
                Bytecode::EqF64 => cmp!(f64, |a, b| a == b),
                Bytecode::NeI8 => cmp!(i8, |a, b| a != b),
                Bytecode::NeI16 => cmp!(i16, |a, b| a != b),
                Bytecode::NeI32 => cmp!(i32, |a, b| a != b),
                Bytecode::NeI64 => cmp!(i64, |a, b| a != b),
                Bytecode::NeU8 => cmp!(u8, |a, b| a != b),
                Bytecode::NeU16 => cmp!(u16, |a, b| a != b),
                Bytecode::NeU32 => cmp!(u32, |a, b| a != b),
                Bytecode::NeU64 => cmp!(u64, |a, b| a != b),
                Bytecode::NeF32 => cmp!(f32, |a, b| a != b),
                Bytecode::NeF64 => cmp!(f64, |a, b| a != b),
                Bytecode::LtI8 => cmp!(i8, |a, b| a < b),
                Bytecode::LtI16 => cmp!(i16, |a, b| a < b),
                Bytecode::LtI32 => cmp!(i32, |a, b| a < b),
                Bytecode::LtI64 => cmp!(i64, |a, b| a < b),
                Bytecode::LtU8 => cmp!(u8, |a, b| a < b),
                Bytecode::LtU16 => cmp!(u16, |a, b| a < b),
                Bytecode::LtU32 => cmp!(u32, |a, b| a < b),
                Bytecode::LtU64 => cmp!(u64, |a, b| a < b),
                Bytecode::LtF32 => cmp!(f32, |a, b| a < b),
                Bytecode::LtF64 => cmp!(f64, |a, b| a < b),
                Bytecode::LeI8 => cmp!(i8, |a, b| a <= b),
                Bytecode::LeI16 => cmp!(i16, |a, b| a <= b),
                Bytecode::LeI32 => cmp!(i32, |a, b| a <= b),
                Bytecode::LeI64 => cmp!(i64, |a, b| a <= b),
                Bytecode::LeU8 => cmp!(u8, |a, b| a <= b),
                Bytecode::LeU16 => cmp!(u16, |a, b| a <= b),
                Bytecode::LeU32 => cmp!(u32, |a, b| a <= b),
                Bytecode::LeU64 => cmp!(u64, |a, b| a <= b),
                Bytecode::LeF32 => cmp!(f32, |a, b| a <= b),
                Bytecode::LeF64 => cmp!(f64, |a, b| a <= b),
                Bytecode::GtI8 => cmp!(i8, |a, b| a > b),
                Bytecode::GtI16 => cmp!(i16, |a, b| a > b),
                Bytecode::GtI32 => cmp!(i32, |a, b| a > b),
                Bytecode::GtI64 => cmp!(i64, |a, b| a > b),
                Bytecode::GtU8 => cmp!(u8, |a, b| a > b),
                Bytecode::GtU16 => cmp!(u16, |a, b| a > b),
                Bytecode::GtU32 => cmp!(u32, |a, b| a > b),
                Bytecode::GtU64 => cmp!(u64, |a, b| a > b),
                Bytecode::GtF32 => cmp!(f32, |a, b| a > b),
                Bytecode::GtF64 => cmp!(f64, |a, b| a > b),
                Bytecode::GeI8 => cmp!(i8, |a, b| a >= b),
                Bytecode::GeI16 => cmp!(i16, |a, b| a >= b),
                Bytecode::GeI32 => cmp!(i32, |a, b| a >= b),
                Bytecode::GeI64 => cmp!(i64, |a, b| a >= b),
                Bytecode::GeU8 => cmp!(u8, |a, b| a >= b),
                Bytecode::GeU16 => cmp!(u16, |a, b| a >= b),
                Bytecode::GeU32 => cmp!(u32, |a, b| a >= b),
                Bytecode::GeU64 => cmp!(u64, |a, b| a >= b),
                Bytecode::GeF32 => cmp!(f32, |a, b| a >= b),
                Bytecode::GeF64 => cmp!(f64, |a, b| a >= b),

                // ---------------------------------------------------
                // Bitwise
                // ---------------------------------------------------
                Bytecode::BitAndI8 => arith!(i8, |a, b| a & b),
                Bytecode::BitAndI16 => arith!(i16, |a, b| a & b),
                Bytecode::BitAndI32 => arith!(i32, |a, b| a & b),
                Bytecode::BitAndI64 => arith!(i64, |a, b| a & b),
                Bytecode::BitAndU8 => arith!(u8, |a, b| a & b),
                Bytecode::BitAndU16 => arith!(u16, |a, b| a & b),
                Bytecode::BitAndU32 => arith!(u32, |a, b| a & b),
                Bytecode::BitAndU64 => arith!(u64, |a, b| a & b),
                Bytecode::BitOrI8 => arith!(i8, |a, b| a | b),
                Bytecode::BitOrI16 => arith!(i16, |a, b| a | b),
                Bytecode::BitOrI32 => arith!(i32, |a, b| a | b),
                Bytecode::BitOrI64 => arith!(i64, |a, b| a | b),
                Bytecode::BitOrU8 => arith!(u8, |a, b| a | b),
                Bytecode::BitOrU16 => arith!(u16, |a, b| a | b),
                Bytecode::BitOrU32 => arith!(u32, |a, b| a | b),
                Bytecode::BitOrU64 => arith!(u64, |a, b| a | b),
                Bytecode::BitXorI8 => arith!(i8, |a, b| a ^ b),
                Bytecode::BitXorI16 => arith!(i16, |a, b| a ^ b),
                Bytecode::BitXorI32 => arith!(i32, |a, b| a ^ b),
                Bytecode::BitXorI64 => arith!(i64, |a, b| a ^ b),
                Bytecode::BitXorU8 => arith!(u8, |a, b| a ^ b),
                Bytecode::BitXorU16 => arith!(u16, |a, b| a ^ b),
                Bytecode::BitXorU32 => arith!(u32, |a, b| a ^ b),
                Bytecode::BitXorU64 => arith!(u64, |a, b| a ^ b),
                Bytecode::BitNegI8 => unary!(i8, |a: i8| !a),
                Bytecode::BitNegI16 => unary!(i16, |a: i16| !a),
                Bytecode::BitNegI32 => unary!(i32, |a: i32| !a),
                Bytecode::BitNegI64 => unary!(i64, |a: i64| !a),
                Bytecode::BitNegU8 => unary!(u8, |a: u8| !a),
                Bytecode::BitNegU16 => unary!(u16, |a: u16| !a),
                Bytecode::BitNegU32 => unary!(u32, |a: u32| !a),
                Bytecode::BitNegU64 => unary!(u64, |a: u64| !a),
                Bytecode::ShlI8 => arith!(i8, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlI16 => arith!(i16, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlI32 => arith!(i32, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlI64 => arith!(i64, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlU8 => arith!(u8, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlU16 => arith!(u16, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShlU32 => arith!(u32, |a, b| a.wrapping_shl(b)),
                Bytecode::ShlU64 => arith!(u64, |a, b| a.wrapping_shl(b as u32)),
                Bytecode::ShrI8 => arith!(i8, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrI16 => arith!(i16, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrI32 => arith!(i32, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrI64 => arith!(i64, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrU8 => arith!(u8, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrU16 => arith!(u16, |a, b| a.wrapping_shr(b as u32)),
                Bytecode::ShrU32 => arith!(u32, |a, b| a.wrapping_shr(b)),
                Bytecode::ShrU64 => arith!(u64, |a, b| a.wrapping_shr(b as u32)),

                Bytecode::Not => {
                    let dst = local!();
                    let a = local!();
                    unsafe { write::<u8>(frame, dst, u8::from(read::<u8>(frame, a) == 0)) }
                }
                Bytecode::IntCast => {
                    let dst = local!();
                    let src = local!();
                    let src_code = read_u8!();
                    let dst_code = read_u8!();
                    unsafe {
                        let value: i128 = match src_code {
                            0 => i128::from(read::<i8>(frame, src)),
                            1 => i128::from(read::<i16>(frame, src)),
                            2 => i128::from(read::<i32>(frame, src)),
                            3 => i128::from(read::<i64>(frame, src)),
                            4 => i128::from(read::<u8>(frame, src)),
                            5 => i128::from(read::<u16>(frame, src)),
                            6 => i128::from(read::<u32>(frame, src)),
                            _ => i128::from(read::<u64>(frame, src)),
                        };
                        match dst_code {
                            0 => write::<i8>(frame, dst, value as i8),
                            1 => write::<i16>(frame, dst, value as i16),
                            2 => write::<i32>(frame, dst, value as i32),
                            3 => write::<i64>(frame, dst, value as i64),
                            4 => write::<u8>(frame, dst, value as u8),
                            5 => write::<u16>(frame, dst, value as u16),
                            6 => write::<u32>(frame, dst, value as u32),
                            _ => write::<u64>(frame, dst, value as u64),
                        }
                    }
                }
                Bytecode::FloatToDouble => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<f64>(frame, dst, f64::from(read::<f32>(frame, src))) }
                }
                Bytecode::DoubleToFloat => {
                    let dst = local!();
                    let src = local!();
                    unsafe { write::<f32>(frame, dst, read::<f64>(frame, src) as f32) }
                }

                // ---------------------------------------------------
                // SQL value construction
                // ---------------------------------------------------
                Bytecode::BoolToSql => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<u8>(frame, src) != 0;
                        write::<BoolVal>(frame, dst, BoolVal::new(v));
                    }
                }
                Bytecode::IntToSql => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<i64>(frame, src);
                        write::<Integer>(frame, dst, Integer::new(v));
                    }
                }
                Bytecode::FloatToSql => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<f64>(frame, src);
                        write::<Real>(frame, dst, Real::new(v));
                    }
                }
                Bytecode::DateToSql => {
                    let dst = local!();
                    let (y, m, d) = (local!(), local!(), local!());
                    unsafe {
                        let year = read::<i32>(frame, y);
                        let month = read::<i32>(frame, m) as u32;
                        let day = read::<i32>(frame, d) as u32;
                        let date = Date::from_ymd(year, month, day)
                            .map_err(ExecutionError::Conversion)?;
                        write::<DateVal>(frame, dst, DateVal::new(date));
                    }
                }
                Bytecode::InitString => {
                    let dst = local!();
                    let index = read_u32!();
                    let text = self
                        .module
                        .string(index)
                        .ok_or(ExecutionError::MalformedBytecode(ip))?;
                    // Pool strings outlive execution; the handle may borrow.
                    let entry = VarlenEntry::create(text.as_ptr(), text.len() as u32);
                    unsafe { write::<StringVal>(frame, dst, StringVal::new(entry)) }
                }
                Bytecode::ForceTruth => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<BoolVal>(frame, src);
                        write::<u8>(frame, dst, u8::from(v.force_truth()));
                    }
                }

                // ---------------------------------------------------
                // SQL arithmetic and comparisons
                // ---------------------------------------------------
                Bytecode::AddInteger => sql_arith!(Integer, i64, |a, b| a.wrapping_add(b), false),
                Bytecode::SubInteger => sql_arith!(Integer, i64, |a, b| a.wrapping_sub(b), false),
                Bytecode::MulInteger => sql_arith!(Integer, i64, |a, b| a.wrapping_mul(b), false),
                Bytecode::DivInteger => sql_arith!(Integer, i64, |a, b| a.wrapping_div(b), true),
                Bytecode::RemInteger => sql_arith!(Integer, i64, |a, b| a.wrapping_rem(b), true),
                Bytecode::AddReal => sql_arith!(Real, f64, |a, b| a + b, false),
                Bytecode::SubReal => sql_arith!(Real, f64, |a, b| a - b, false),
                Bytecode::MulReal => sql_arith!(Real, f64, |a, b| a * b, false),
                Bytecode::DivReal => sql_arith!(Real, f64, |a, b| a / b, true),
                Bytecode::RemReal => sql_arith!(Real, f64, |a, b| a % b, true),

                Bytecode::EqInteger => sql_cmp!(Integer, |a, b| a == b),
                Bytecode::NeInteger => sql_cmp!(Integer, |a, b| a != b),
                Bytecode::LtInteger => sql_cmp!(Integer, |a, b| a < b),
                Bytecode::LeInteger => sql_cmp!(Integer, |a, b| a <= b),
                Bytecode::GtInteger => sql_cmp!(Integer, |a, b| a > b),
                Bytecode::GeInteger => sql_cmp!(Integer, |a, b| a >= b),
                Bytecode::EqReal => sql_cmp!(Real, |a, b| a == b),
                Bytecode::NeReal => sql_cmp!(Real, |a, b| a != b),
                Bytecode::LtReal => sql_cmp!(Real, |a, b| a < b),
                Bytecode::LeReal => sql_cmp!(Real, |a, b| a <= b),
                Bytecode::GtReal => sql_cmp!(Real, |a, b| a > b),
                Bytecode::GeReal => sql_cmp!(Real, |a, b| a >= b),
                Bytecode::EqString => sql_cmp!(StringVal, |a, b| a == b),
                Bytecode::NeString => sql_cmp!(StringVal, |a, b| a != b),
                Bytecode::LtString => sql_cmp!(StringVal, |a, b| a < b),
                Bytecode::LeString => sql_cmp!(StringVal, |a, b| a <= b),
                Bytecode::GtString => sql_cmp!(StringVal, |a, b| a > b),
                Bytecode::GeString => sql_cmp!(StringVal, |a, b| a >= b),
                Bytecode::EqDate => sql_cmp!(DateVal, |a, b| a == b),
                Bytecode::NeDate => sql_cmp!(DateVal, |a, b| a != b),
                Bytecode::LtDate => sql_cmp!(DateVal, |a, b| a < b),
                Bytecode::LeDate => sql_cmp!(DateVal, |a, b| a <= b),
                Bytecode::GtDate => sql_cmp!(DateVal, |a, b| a > b),
                Bytecode::GeDate => sql_cmp!(DateVal, |a, b| a >= b),
                Bytecode::EqTimestamp => {
                    let dst = local!();
                    let a = local!();
                    let b = local!();
                    unsafe {
                        let x = read::<crate::sql::value::TimestampVal>(frame, a);
                        let y = read::<crate::sql::value::TimestampVal>(frame, b);
                        let result = if x.is_null || y.is_null {
                            BoolVal::null()
                        } else {
                            BoolVal::new(x.value == y.value)
                        };
                        write::<BoolVal>(frame, dst, result);
                    }
                }
                Bytecode::NeTimestamp
                | Bytecode::LtTimestamp
                | Bytecode::LeTimestamp
                | Bytecode::GtTimestamp
                | Bytecode::GeTimestamp => {
                    let dst = local!();
                    let a = local!();
                    let b = local!();
                    unsafe {
                        let x = read::<crate::sql::value::TimestampVal>(frame, a);
                        let y = read::<crate::sql::value::TimestampVal>(frame, b);
                        let result = if x.is_null || y.is_null {
                            BoolVal::null()
                        } else {
                            let v = match op {
                                Bytecode::NeTimestamp => x.value != y.value,
                                Bytecode::LtTimestamp => x.value < y.value,
                                Bytecode::LeTimestamp => x.value <= y.value,
                                Bytecode::GtTimestamp => x.value > y.value,
                                _ => x.value >= y.value,
                            };
                            BoolVal::new(v)
                        };
                        write::<BoolVal>(frame, dst, result);
                    }
                }

                Bytecode::InitSqlNull => {
                    let dst = local!();
                    let size = read_u32!() as usize;
                    let null_offset = read_u32!() as usize;
                    unsafe {
                        let target = resolve(frame, dst);
                        std::ptr::write_bytes(target, 0, size);
                        target.add(null_offset).write(1);
                    }
                }
                Bytecode::ValIsNull | Bytecode::ValIsNotNull => {
                    let dst = local!();
                    let value = local!();
                    let null_offset = read_u32!() as usize;
                    unsafe {
                        let is_null = resolve(frame, value).add(null_offset).read() != 0;
                        let result = if op == Bytecode::ValIsNull {
                            is_null
                        } else {
                            !is_null
                        };
                        write::<u8>(frame, dst, u8::from(result));
                    }
                }

                // ---------------------------------------------------
                // Strings, trig, hashing
                // ---------------------------------------------------
                Bytecode::Like | Bytecode::NotLike => {
                    let dst = local!();
                    let a = local!();
                    let b = local!();
                    unsafe {
                        let input = read::<StringVal>(frame, a);
                        let pattern = read::<StringVal>(frame, b);
                        let result = if input.is_null || pattern.is_null {
                            BoolVal::null()
                        } else {
                            let matched = crate::sql::functions::like(
                                input.value.as_bytes(),
                                pattern.value.as_bytes(),
                                b'\\',
                            );
                            BoolVal::new(if op == Bytecode::Like { matched } else { !matched })
                        };
                        write::<BoolVal>(frame, dst, result);
                    }
                }
                Bytecode::Acos => sql_unary_real!(numeric::acos),
                Bytecode::Asin => sql_unary_real!(numeric::asin),
                Bytecode::Atan => sql_unary_real!(numeric::atan),
                Bytecode::Cos => sql_unary_real!(numeric::cos),
                Bytecode::Cot => sql_unary_real!(numeric::cot),
                Bytecode::Sin => sql_unary_real!(numeric::sin),
                Bytecode::Tan => sql_unary_real!(numeric::tan),
                Bytecode::Atan2 => {
                    let dst = local!();
                    let a = local!();
                    let b = local!();
                    unsafe {
                        let y = read::<Real>(frame, a);
                        let x = read::<Real>(frame, b);
                        write::<Real>(frame, dst, numeric::atan2(y, x));
                    }
                }

                Bytecode::HashInt => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<Integer>(frame, src);
                        let h = if v.is_null { 0 } else { hashing::hash_u64(v.value as u64) };
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::HashReal => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<Real>(frame, src);
                        let h = if v.is_null {
                            0
                        } else {
                            hashing::hash_u64(v.value.to_bits())
                        };
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::HashString => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<StringVal>(frame, src);
                        let h = if v.is_null { 0 } else { v.value.hash() };
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::HashDate => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<DateVal>(frame, src);
                        let h = if v.is_null { 0 } else { v.value.hash() };
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::HashTimestamp => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let v = read::<crate::sql::value::TimestampVal>(frame, src);
                        let h = if v.is_null { 0 } else { v.value.hash() };
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::HashCombine => {
                    let dst = local!();
                    let src = local!();
                    unsafe {
                        let seed = read::<u64>(frame, dst);
                        let h = read::<u64>(frame, src);
                        write::<u64>(frame, dst, hashing::hash_combine(seed, h));
                    }
                }

                // ---------------------------------------------------
                // Table scans
                // ---------------------------------------------------
                Bytecode::TableVectorIteratorInit => {
                    let iter = local!();
                    let exec_ctx = local!();
                    let table_id = read_u16!();
                    let table = self
                        .catalog
                        .lookup_table_by_id(table_id)
                        .ok_or(ExecutionError::UnknownTable(table_id))?;
                    unsafe {
                        let _ = read_ptr::<ExecutionContext>(frame, exec_ctx);
                        let iter_ptr = read_ptr::<TableVectorIterator>(frame, iter);
                        iter_ptr.write(TableVectorIterator::new(table));
                        (*iter_ptr).init();
                    }
                }
                Bytecode::TableVectorIteratorAdvance => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let iter_ptr = read_ptr::<TableVectorIterator>(frame, iter);
                        write::<u8>(frame, dst, u8::from((*iter_ptr).advance()));
                    }
                }
                Bytecode::TableVectorIteratorGetVpi => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let iter_ptr = read_ptr::<TableVectorIterator>(frame, iter);
                        let vpi = (*iter_ptr).vector_projection_iterator();
                        write::<usize>(frame, dst, vpi as usize);
                    }
                }
                Bytecode::TableVectorIteratorClose => {
                    let iter = local!();
                    unsafe {
                        let iter_ptr = read_ptr::<TableVectorIterator>(frame, iter);
                        std::ptr::drop_in_place(iter_ptr);
                    }
                }
                Bytecode::ParallelScanTable => {
                    let table_id = read_u16!();
                    let query_state = local!();
                    let tls = local!();
                    let scan_fn = read_u16!();
                    let table = self
                        .catalog
                        .lookup_table_by_id(table_id)
                        .ok_or(ExecutionError::UnknownTable(table_id))?;
                    unsafe {
                        let qs = read_ptr::<u8>(frame, query_state);
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        let vm = self;
                        let scan = move |qs: *mut u8,
                                         ts: *mut u8,
                                         iter: &mut TableVectorIterator|
                              -> Result<()> {
                            vm.invoke(
                                scan_fn,
                                &[qs as usize, ts as usize, std::ptr::from_mut(iter) as usize],
                            )
                        };
                        TableVectorIterator::parallel_scan(&table, qs, &*tls_ptr, &scan, 2)?;
                    }
                }

                // ---------------------------------------------------
                // VPI access
                // ---------------------------------------------------
                Bytecode::VpiIsFiltered => {
                    let dst = local!();
                    let vpi = local!();
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<u8>(frame, dst, u8::from((*vpi).is_filtered()));
                    }
                }
                Bytecode::VpiHasNext => {
                    let dst = local!();
                    let vpi = local!();
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<u8>(frame, dst, u8::from((*vpi).has_next()));
                    }
                }
                Bytecode::VpiAdvance => {
                    let vpi = local!();
                    unsafe { (*read_ptr::<VectorProjectionIterator>(frame, vpi)).advance() }
                }
                Bytecode::VpiMatch => {
                    let vpi = local!();
                    let cond = local!();
                    unsafe {
                        let matched = read::<u8>(frame, cond) != 0;
                        (*read_ptr::<VectorProjectionIterator>(frame, vpi)).match_tuple(matched);
                    }
                }
                Bytecode::VpiReset => {
                    let vpi = local!();
                    unsafe { (*read_ptr::<VectorProjectionIterator>(frame, vpi)).reset() }
                }
                Bytecode::VpiGetBool => {
                    let dst = local!();
                    let vpi = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<BoolVal>(frame, dst, (*vpi).get_bool(col));
                    }
                }
                Bytecode::VpiGetTinyInt
                | Bytecode::VpiGetSmallInt
                | Bytecode::VpiGetInt
                | Bytecode::VpiGetBigInt
                | Bytecode::VpiGetIntNull
                | Bytecode::VpiGetBigIntNull => {
                    let dst = local!();
                    let vpi = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<Integer>(frame, dst, (*vpi).get_integer(col));
                    }
                }
                Bytecode::VpiGetReal
                | Bytecode::VpiGetDouble
                | Bytecode::VpiGetRealNull
                | Bytecode::VpiGetDoubleNull => {
                    let dst = local!();
                    let vpi = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<Real>(frame, dst, (*vpi).get_real(col));
                    }
                }
                Bytecode::VpiGetDate | Bytecode::VpiGetDateNull => {
                    let dst = local!();
                    let vpi = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<DateVal>(frame, dst, (*vpi).get_date(col));
                    }
                }
                Bytecode::VpiGetString | Bytecode::VpiGetStringNull => {
                    let dst = local!();
                    let vpi = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let vpi = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        write::<StringVal>(frame, dst, (*vpi).get_string(col));
                    }
                }
                Bytecode::VpiSetInt | Bytecode::VpiSetBigInt => {
                    let vpi = local!();
                    let src = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let value = read::<Integer>(frame, src);
                        (*read_ptr::<VectorProjectionIterator>(frame, vpi)).set_integer(col, value);
                    }
                }
                Bytecode::VpiSetReal | Bytecode::VpiSetDouble => {
                    let vpi = local!();
                    let src = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let value = read::<Real>(frame, src);
                        (*read_ptr::<VectorProjectionIterator>(frame, vpi)).set_real(col, value);
                    }
                }
                Bytecode::VpiSetDate => {
                    let vpi = local!();
                    let src = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let value = read::<DateVal>(frame, src);
                        (*read_ptr::<VectorProjectionIterator>(frame, vpi)).set_date(col, value);
                    }
                }
                Bytecode::VpiSetString => {
                    let vpi = local!();
                    let src = local!();
                    let col = read_u16!() as usize;
                    unsafe {
                        let value = read::<StringVal>(frame, src);
                        (*read_ptr::<VectorProjectionIterator>(frame, vpi)).set_string(col, value);
                    }
                }

                // ---------------------------------------------------
                // Filter manager
                // ---------------------------------------------------
                Bytecode::FilterManagerInit => {
                    let fm = local!();
                    unsafe {
                        read_ptr::<FilterManager>(frame, fm).write(FilterManager::new());
                    }
                }
                Bytecode::FilterManagerStartNewClause => {
                    let fm = local!();
                    unsafe { (*read_ptr::<FilterManager>(frame, fm)).start_new_clause() }
                }
                Bytecode::FilterManagerInsertClauseTerm => {
                    let fm = local!();
                    let term_fn = read_u16!();
                    let vm = self.clone();
                    let term = Box::new(
                        move |vp: &crate::sql::VectorProjection,
                              tids: &mut crate::sql::TupleIdList|
                              -> Result<()> {
                            vm.invoke(
                                term_fn,
                                &[
                                    std::ptr::from_ref(vp) as usize,
                                    std::ptr::from_mut(tids) as usize,
                                ],
                            )
                        },
                    );
                    unsafe { (*read_ptr::<FilterManager>(frame, fm)).insert_clause_term(term) }
                }
                Bytecode::FilterManagerRunFilters => {
                    let fm = local!();
                    let vpi = local!();
                    unsafe {
                        let vpi_ptr = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        let vp = (*vpi_ptr).projection_ptr();
                        (*read_ptr::<FilterManager>(frame, fm))
                            .run_filters(&mut *vp, &mut *vpi_ptr)?;
                    }
                }
                Bytecode::FilterManagerFree => {
                    let fm = local!();
                    unsafe { std::ptr::drop_in_place(read_ptr::<FilterManager>(frame, fm)) }
                }

                // ---------------------------------------------------
                // Aggregation hash table
                // ---------------------------------------------------
                Bytecode::AggregationHashTableInit => {
                    let aht = local!();
                    let _exec_ctx = local!();
                    let payload_size = local!();
                    unsafe {
                        let size = read::<u32>(frame, payload_size) as usize;
                        read_ptr::<AggregationHashTable>(frame, aht)
                            .write(AggregationHashTable::new(size));
                    }
                }
                Bytecode::AggregationHashTableAllocTuple
                | Bytecode::AggregationHashTableAllocTuplePartitioned => {
                    let dst = local!();
                    let aht = local!();
                    let hash = local!();
                    let partitioned = op == Bytecode::AggregationHashTableAllocTuplePartitioned;
                    unsafe {
                        let h = read::<u64>(frame, hash);
                        let payload =
                            (*read_ptr::<AggregationHashTable>(frame, aht)).insert(h, partitioned);
                        write::<usize>(frame, dst, payload as usize);
                    }
                }
                Bytecode::AggregationHashTableLookup => {
                    let dst = local!();
                    let aht = local!();
                    let hash = local!();
                    let key_eq_fn = read_u16!();
                    let probe = local!();
                    unsafe {
                        let h = read::<u64>(frame, hash);
                        let probe_ptr = read_ptr::<u8>(frame, probe);
                        let vm = self;
                        let key_eq = |payload: *const u8| -> bool {
                            let mut result: u8 = 0;
                            let args = [
                                std::ptr::from_mut(&mut result) as usize,
                                payload as usize,
                                probe_ptr as usize,
                            ];
                            vm.invoke(key_eq_fn, &args).is_ok() && result != 0
                        };
                        let found = (*read_ptr::<AggregationHashTable>(frame, aht)).lookup(h, key_eq);
                        write::<usize>(frame, dst, found.map_or(0, |p| p as usize));
                    }
                }
                Bytecode::AggregationHashTableProcessBatch => {
                    let aht = local!();
                    let vpi = local!();
                    let num_keys = read_u16!() as usize;
                    let key_cols = local!();
                    let init_fn = read_u16!();
                    let merge_fn = read_u16!();
                    let partitioned = local!();
                    unsafe {
                        let cols_ptr = read_ptr::<u32>(frame, key_cols);
                        let key_columns: Vec<usize> = (0..num_keys)
                            .map(|i| cols_ptr.add(i).read_unaligned() as usize)
                            .collect();
                        let part = read::<u8>(frame, partitioned) != 0;
                        let vm = self;
                        let init = move |payload: *mut u8,
                                         vpi: &mut VectorProjectionIterator|
                              -> Result<()> {
                            vm.invoke(
                                init_fn,
                                &[payload as usize, std::ptr::from_mut(vpi) as usize],
                            )
                        };
                        let merge = move |payload: *mut u8,
                                          vpi: &mut VectorProjectionIterator|
                              -> Result<()> {
                            vm.invoke(
                                merge_fn,
                                &[payload as usize, std::ptr::from_mut(vpi) as usize],
                            )
                        };
                        let vpi_ptr = read_ptr::<VectorProjectionIterator>(frame, vpi);
                        (*read_ptr::<AggregationHashTable>(frame, aht)).process_batch(
                            &mut *vpi_ptr,
                            &key_columns,
                            &init,
                            &merge,
                            part,
                        )?;
                    }
                }
                Bytecode::AggregationHashTableTransferPartitions => {
                    let aht = local!();
                    let tls = local!();
                    let offset = local!();
                    let merge_fn = read_u16!();
                    unsafe {
                        let off = read::<u32>(frame, offset) as usize;
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        let vm = self;
                        let merge = move |table: *mut AggregationHashTable,
                                          iter: &mut AhtOverflowPartitionIterator|
                              -> Result<()> {
                            vm.invoke(
                                merge_fn,
                                &[table as usize, std::ptr::from_mut(iter) as usize],
                            )
                        };
                        (*read_ptr::<AggregationHashTable>(frame, aht)).transfer_partitions(
                            &*tls_ptr,
                            off,
                            &merge,
                        )?;
                    }
                }
                Bytecode::AggregationHashTableParallelPartitionedScan => {
                    let aht = local!();
                    let query_state = local!();
                    let tls = local!();
                    let scan_fn = read_u16!();
                    unsafe {
                        let qs = read_ptr::<u8>(frame, query_state);
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        let vm = self;
                        let scan = move |ctx: *mut u8, ts: *mut u8, iter: &mut AhtIterator| {
                            vm.invoke(
                                scan_fn,
                                &[ctx as usize, ts as usize, std::ptr::from_mut(iter) as usize],
                            )
                        };
                        (*read_ptr::<AggregationHashTable>(frame, aht)).parallel_partitioned_scan(
                            qs,
                            &*tls_ptr,
                            &scan,
                        )?;
                    }
                }
                Bytecode::AggregationHashTableFree => {
                    let aht = local!();
                    unsafe {
                        std::ptr::drop_in_place(read_ptr::<AggregationHashTable>(frame, aht));
                    }
                }
                Bytecode::AggregationHashTableIteratorInit => {
                    let iter = local!();
                    let aht = local!();
                    unsafe {
                        let table = read_ptr::<AggregationHashTable>(frame, aht);
                        read_ptr::<AhtIterator>(frame, iter).write(AhtIterator::new(&*table));
                    }
                }
                Bytecode::AggregationHashTableIteratorHasNext => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let it = read_ptr::<AhtIterator>(frame, iter);
                        write::<u8>(frame, dst, u8::from((*it).has_next()));
                    }
                }
                Bytecode::AggregationHashTableIteratorNext => {
                    let iter = local!();
                    unsafe { (*read_ptr::<AhtIterator>(frame, iter)).next() }
                }
                Bytecode::AggregationHashTableIteratorGetRow => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let row = (*read_ptr::<AhtIterator>(frame, iter)).row();
                        write::<usize>(frame, dst, row as usize);
                    }
                }
                Bytecode::AggregationHashTableIteratorFree => {
                    let iter = local!();
                    unsafe { std::ptr::drop_in_place(read_ptr::<AhtIterator>(frame, iter)) }
                }
                Bytecode::AggregationOverflowPartitionIteratorHasNext => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let it = read_ptr::<AhtOverflowPartitionIterator>(frame, iter);
                        write::<u8>(frame, dst, u8::from((*it).has_next()));
                    }
                }
                Bytecode::AggregationOverflowPartitionIteratorNext => {
                    let iter = local!();
                    unsafe { (*read_ptr::<AhtOverflowPartitionIterator>(frame, iter)).next() }
                }
                Bytecode::AggregationOverflowPartitionIteratorGetHash => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let h = (*read_ptr::<AhtOverflowPartitionIterator>(frame, iter)).hash();
                        write::<u64>(frame, dst, h);
                    }
                }
                Bytecode::AggregationOverflowPartitionIteratorGetRow => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let row = (*read_ptr::<AhtOverflowPartitionIterator>(frame, iter)).row();
                        write::<usize>(frame, dst, row as usize);
                    }
                }

                // ---------------------------------------------------
                // Join hash table
                // ---------------------------------------------------
                Bytecode::JoinHashTableInit => {
                    let jht = local!();
                    let _exec_ctx = local!();
                    let tuple_size = local!();
                    unsafe {
                        let size = read::<u32>(frame, tuple_size) as usize;
                        read_ptr::<JoinHashTable>(frame, jht).write(JoinHashTable::new(size));
                    }
                }
                Bytecode::JoinHashTableAllocTuple => {
                    let dst = local!();
                    let jht = local!();
                    let hash = local!();
                    unsafe {
                        let h = read::<u64>(frame, hash);
                        let payload = (*read_ptr::<JoinHashTable>(frame, jht)).alloc(h);
                        write::<usize>(frame, dst, payload as usize);
                    }
                }
                Bytecode::JoinHashTableBuild => {
                    let jht = local!();
                    unsafe { (*read_ptr::<JoinHashTable>(frame, jht)).build() }
                }
                Bytecode::JoinHashTableBuildParallel => {
                    let jht = local!();
                    let tls = local!();
                    let offset = local!();
                    unsafe {
                        let off = read::<u32>(frame, offset) as usize;
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        (*read_ptr::<JoinHashTable>(frame, jht)).build_parallel(&*tls_ptr, off);
                    }
                }
                Bytecode::JoinHashTableLookup => {
                    let jht = local!();
                    let iter = local!();
                    let hash = local!();
                    unsafe {
                        let h = read::<u64>(frame, hash);
                        let it = read_ptr::<HashTableEntryIterator>(frame, iter);
                        // The iterator slot may be uninitialized; overwrite.
                        it.write(HashTableEntryIterator::new());
                        (*read_ptr::<JoinHashTable>(frame, jht)).lookup_iter(h, &mut *it);
                    }
                }
                Bytecode::JoinHashTableFree => {
                    let jht = local!();
                    unsafe { std::ptr::drop_in_place(read_ptr::<JoinHashTable>(frame, jht)) }
                }
                Bytecode::HashTableEntryIteratorHasNext => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let it = read_ptr::<HashTableEntryIterator>(frame, iter);
                        write::<u8>(frame, dst, u8::from((*it).has_next()));
                    }
                }
                Bytecode::HashTableEntryIteratorGetRow => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let row = (*read_ptr::<HashTableEntryIterator>(frame, iter)).get_row();
                        write::<usize>(frame, dst, row as usize);
                    }
                }

                // ---------------------------------------------------
                // Sorter
                // ---------------------------------------------------
                Bytecode::SorterInit => {
                    let sorter = local!();
                    let _exec_ctx = local!();
                    let cmp_fn = read_u16!();
                    let tuple_size = local!();
                    unsafe {
                        let size = read::<u32>(frame, tuple_size) as usize;
                        let vm = self.clone();
                        let cmp = Box::new(move |lhs: *const u8, rhs: *const u8| -> i32 {
                            let mut result: i32 = 0;
                            let args = [
                                std::ptr::from_mut(&mut result) as usize,
                                lhs as usize,
                                rhs as usize,
                            ];
                            if vm.invoke(cmp_fn, &args).is_err() {
                                tracing::error!("sort comparator raised; treating rows as equal");
                                return 0;
                            }
                            result
                        });
                        read_ptr::<Sorter>(frame, sorter).write(Sorter::new(cmp, size));
                    }
                }
                Bytecode::SorterAllocTuple => {
                    let dst = local!();
                    let sorter = local!();
                    unsafe {
                        let row = (*read_ptr::<Sorter>(frame, sorter)).alloc_input_tuple();
                        write::<usize>(frame, dst, row as usize);
                    }
                }
                Bytecode::SorterAllocTupleTopK => {
                    let dst = local!();
                    let sorter = local!();
                    let top_k = local!();
                    unsafe {
                        let k = u64::from(read::<u32>(frame, top_k));
                        let row = (*read_ptr::<Sorter>(frame, sorter)).alloc_input_tuple_top_k(k);
                        write::<usize>(frame, dst, row as usize);
                    }
                }
                Bytecode::SorterAllocTupleTopKFinish => {
                    let sorter = local!();
                    let top_k = local!();
                    unsafe {
                        let k = u64::from(read::<u32>(frame, top_k));
                        (*read_ptr::<Sorter>(frame, sorter)).alloc_input_tuple_top_k_finish(k);
                    }
                }
                Bytecode::SorterSort => {
                    let sorter = local!();
                    unsafe { (*read_ptr::<Sorter>(frame, sorter)).sort() }
                }
                Bytecode::SorterSortParallel => {
                    let sorter = local!();
                    let tls = local!();
                    let offset = local!();
                    unsafe {
                        let off = read::<u32>(frame, offset) as usize;
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        (*read_ptr::<Sorter>(frame, sorter)).sort_parallel(&*tls_ptr, off);
                    }
                }
                Bytecode::SorterSortTopKParallel => {
                    let sorter = local!();
                    let tls = local!();
                    let offset = local!();
                    let top_k = local!();
                    unsafe {
                        let off = read::<u32>(frame, offset) as usize;
                        let k = u64::from(read::<u32>(frame, top_k));
                        let tls_ptr = read_ptr::<ThreadStateContainer>(frame, tls);
                        (*read_ptr::<Sorter>(frame, sorter)).sort_top_k_parallel(&*tls_ptr, off, k);
                    }
                }
                Bytecode::SorterFree => {
                    let sorter = local!();
                    unsafe { std::ptr::drop_in_place(read_ptr::<Sorter>(frame, sorter)) }
                }
                Bytecode::SorterIteratorInit => {
                    let iter = local!();
                    let sorter = local!();
                    unsafe {
                        let sorter_ptr = read_ptr::<Sorter>(frame, sorter);
                        read_ptr::<SorterIterator>(frame, iter)
                            .write(SorterIterator::new(&*sorter_ptr));
                    }
                }
                Bytecode::SorterIteratorHasNext => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let it = read_ptr::<SorterIterator>(frame, iter);
                        write::<u8>(frame, dst, u8::from((*it).has_next()));
                    }
                }
                Bytecode::SorterIteratorNext => {
                    let iter = local!();
                    unsafe { (*read_ptr::<SorterIterator>(frame, iter)).next() }
                }
                Bytecode::SorterIteratorSkipRows => {
                    let iter = local!();
                    let n = local!();
                    unsafe {
                        let count = read::<u32>(frame, n) as usize;
                        (*read_ptr::<SorterIterator>(frame, iter)).skip_rows(count);
                    }
                }
                Bytecode::SorterIteratorGetRow => {
                    let dst = local!();
                    let iter = local!();
                    unsafe {
                        let row = (*read_ptr::<SorterIterator>(frame, iter)).row();
                        write::<usize>(frame, dst, row as usize);
                    }
                }
                Bytecode::SorterIteratorFree => {
                    let iter = local!();
                    unsafe { std::ptr::drop_in_place(read_ptr::<SorterIterator>(frame, iter)) }
                }

                // ---------------------------------------------------
                // Thread states and output
                // ---------------------------------------------------
                Bytecode::ExecutionContextGetThreadStateContainer => {
                    let dst = local!();
                    let exec_ctx = local!();
                    unsafe {
                        let ctx = read_ptr::<ExecutionContext>(frame, exec_ctx);
                        write::<usize>(frame, dst, (*ctx).thread_states_ptr() as usize);
                    }
                }
                Bytecode::ThreadStateContainerReset => {
                    let tls = local!();
                    let state_size = local!();
                    let init_fn = read_u16!();
                    let destroy_fn = read_u16!();
                    let ctx = local!();
                    unsafe {
                        let size = read::<u32>(frame, state_size) as usize;
                        let ctx_ptr = read_ptr::<u8>(frame, ctx);
                        let init_vm = self.clone();
                        let destroy_vm = self.clone();
                        let init = Box::new(move |ctx: *mut u8, state: *mut u8| {
                            if let Err(err) =
                                init_vm.invoke(init_fn, &[ctx as usize, state as usize])
                            {
                                tracing::error!(%err, "thread-state init failed");
                            }
                        });
                        let destroy = Box::new(move |ctx: *mut u8, state: *mut u8| {
                            if let Err(err) =
                                destroy_vm.invoke(destroy_fn, &[ctx as usize, state as usize])
                            {
                                tracing::error!(%err, "thread-state teardown failed");
                            }
                        });
                        (*read_ptr::<ThreadStateContainer>(frame, tls)).reset(
                            size,
                            Some(init),
                            Some(destroy),
                            ctx_ptr,
                        );
                    }
                }
                Bytecode::ThreadStateContainerIterate => {
                    let tls = local!();
                    let ctx = local!();
                    let iterate_fn = read_u16!();
                    unsafe {
                        let ctx_ptr = read_ptr::<u8>(frame, ctx);
                        let vm = self;
                        let error = std::cell::RefCell::new(None);
                        let callback = |ctx: *mut u8, state: *mut u8| {
                            if error.borrow().is_some() {
                                return;
                            }
                            if let Err(err) = vm.invoke(iterate_fn, &[ctx as usize, state as usize])
                            {
                                *error.borrow_mut() = Some(err);
                            }
                        };
                        (*read_ptr::<ThreadStateContainer>(frame, tls))
                            .iterate_states(ctx_ptr, &callback);
                        if let Some(err) = error.into_inner() {
                            return Err(err);
                        }
                    }
                }
                Bytecode::ThreadStateContainerClear => {
                    let tls = local!();
                    unsafe { (*read_ptr::<ThreadStateContainer>(frame, tls)).clear() }
                }
                Bytecode::ThreadStateContainerAccessCurrentThreadState => {
                    let dst = local!();
                    let tls = local!();
                    unsafe {
                        let state = (*read_ptr::<ThreadStateContainer>(frame, tls))
                            .access_current_thread_state();
                        write::<usize>(frame, dst, state as usize);
                    }
                }
                Bytecode::ResultBufferAllocOutputRow => {
                    let dst = local!();
                    let exec_ctx = local!();
                    unsafe {
                        let ctx = read_ptr::<ExecutionContext>(frame, exec_ctx);
                        write::<usize>(frame, dst, (*ctx).alloc_output_row() as usize);
                    }
                }
                Bytecode::ResultBufferFinalize => {
                    let exec_ctx = local!();
                    unsafe {
                        (*read_ptr::<ExecutionContext>(frame, exec_ctx)).finalize_output();
                    }
                }
            }
        }
    }
}
