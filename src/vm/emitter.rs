//! The bytecode emitter: typed append-only writes into a module's
//! instruction buffer, plus label binding and forward-jump patching.
//!
//! Jump offsets are 32-bit signed deltas measured from the start of the
//! offset field itself. A label bound before a jump (backward jump) emits its
//! delta directly; a jump to an unbound label appends a placeholder and
//! registers itself with the label, and binding the label patches every
//! registered referrer in place.

use super::bytecodes::Bytecode;
use super::function_info::{FunctionId, LocalVar};

/// Placeholder written at forward-jump sites until the label binds.
const JUMP_PLACEHOLDER: i32 = i32::MAX - 1;

/// A bytecode position that jumps can target: either bound to an offset or a
/// set of forward referrers waiting to be patched.
#[derive(Debug, Default)]
pub struct BytecodeLabel {
    bound_offset: Option<usize>,
    referrer_offsets: Vec<usize>,
}

impl BytecodeLabel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound_offset.is_some()
    }

    pub fn offset(&self) -> Option<usize> {
        self.bound_offset
    }
}

/// Emits encoded instructions into a byte buffer.
#[derive(Debug)]
pub struct BytecodeEmitter {
    bytecode: Vec<u8>,
}

impl BytecodeEmitter {
    pub fn new() -> Self {
        BytecodeEmitter {
            bytecode: Vec::new(),
        }
    }

    /// Current write position in the buffer.
    pub fn position(&self) -> usize {
        self.bytecode.len()
    }

    /// Consume the emitter, returning the instruction buffer.
    pub fn finish(self) -> Vec<u8> {
        self.bytecode
    }

    // ---------------------------------------------------------------
    // Scalar encoding
    // ---------------------------------------------------------------

    fn emit_op(&mut self, op: Bytecode) {
        self.bytecode.extend_from_slice(&op.to_u16().to_le_bytes());
    }

    fn emit_u8(&mut self, v: u8) {
        self.bytecode.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.bytecode.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.bytecode.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u64(&mut self, v: u64) {
        self.bytecode.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_local(&mut self, local: LocalVar) {
        self.emit_u32(local.encode());
    }

    // ---------------------------------------------------------------
    // Generic emission
    // ---------------------------------------------------------------

    /// Emit an instruction whose operands are all locals.
    pub fn emit(&mut self, op: Bytecode, locals: &[LocalVar]) {
        debug_assert_eq!(op.operands().len(), locals.len(), "{}", op.name());
        self.emit_op(op);
        for &local in locals {
            self.emit_local(local);
        }
    }

    pub fn emit_unary_op(&mut self, op: Bytecode, dest: LocalVar, input: LocalVar) {
        self.emit(op, &[dest, input]);
    }

    pub fn emit_binary_op(&mut self, op: Bytecode, dest: LocalVar, lhs: LocalVar, rhs: LocalVar) {
        self.emit(op, &[dest, lhs, rhs]);
    }

    // ---------------------------------------------------------------
    // Memory
    // ---------------------------------------------------------------

    pub fn emit_deref(&mut self, op: Bytecode, dest: LocalVar, src: LocalVar) {
        debug_assert!(matches!(
            op,
            Bytecode::Deref1 | Bytecode::Deref2 | Bytecode::Deref4 | Bytecode::Deref8
        ));
        self.emit(op, &[dest, src]);
    }

    pub fn emit_deref_n(&mut self, dest: LocalVar, src: LocalVar, len: u32) {
        self.emit_op(Bytecode::DerefN);
        self.emit_local(dest);
        self.emit_local(src);
        self.emit_u32(len);
    }

    pub fn emit_assign(&mut self, op: Bytecode, dest: LocalVar, src: LocalVar) {
        debug_assert!(matches!(
            op,
            Bytecode::Assign1 | Bytecode::Assign2 | Bytecode::Assign4 | Bytecode::Assign8
        ));
        self.emit(op, &[dest, src]);
    }

    pub fn emit_assign_n(&mut self, dest: LocalVar, src: LocalVar, len: u32) {
        self.emit_op(Bytecode::AssignN);
        self.emit_local(dest);
        self.emit_local(src);
        self.emit_u32(len);
    }

    pub fn emit_assign_imm1(&mut self, dest: LocalVar, value: i8) {
        self.emit_op(Bytecode::AssignImm1);
        self.emit_local(dest);
        self.emit_u8(value as u8);
    }

    pub fn emit_assign_imm2(&mut self, dest: LocalVar, value: i16) {
        self.emit_op(Bytecode::AssignImm2);
        self.emit_local(dest);
        self.emit_u16(value as u16);
    }

    pub fn emit_assign_imm4(&mut self, dest: LocalVar, value: i32) {
        self.emit_op(Bytecode::AssignImm4);
        self.emit_local(dest);
        self.emit_u32(value as u32);
    }

    pub fn emit_assign_imm8(&mut self, dest: LocalVar, value: i64) {
        self.emit_op(Bytecode::AssignImm8);
        self.emit_local(dest);
        self.emit_u64(value as u64);
    }

    pub fn emit_assign_imm4f(&mut self, dest: LocalVar, value: f32) {
        self.emit_op(Bytecode::AssignImm4F);
        self.emit_local(dest);
        self.emit_u32(value.to_bits());
    }

    pub fn emit_assign_imm8f(&mut self, dest: LocalVar, value: f64) {
        self.emit_op(Bytecode::AssignImm8F);
        self.emit_local(dest);
        self.emit_u64(value.to_bits());
    }

    pub fn emit_lea(&mut self, dest: LocalVar, src: LocalVar, offset: u32) {
        self.emit_op(Bytecode::Lea);
        self.emit_local(dest);
        self.emit_local(src);
        self.emit_u32(offset);
    }

    pub fn emit_lea_scaled(
        &mut self,
        dest: LocalVar,
        src: LocalVar,
        index: LocalVar,
        scale: u32,
        offset: u32,
    ) {
        self.emit_op(Bytecode::LeaScaled);
        self.emit_local(dest);
        self.emit_local(src);
        self.emit_local(index);
        self.emit_u32(scale);
        self.emit_u32(offset);
    }

    pub fn emit_int_cast(&mut self, dest: LocalVar, src: LocalVar, src_code: u8, dest_code: u8) {
        self.emit_op(Bytecode::IntCast);
        self.emit_local(dest);
        self.emit_local(src);
        self.emit_u8(src_code);
        self.emit_u8(dest_code);
    }

    pub fn emit_init_sql_null(&mut self, dest: LocalVar, size: u32, null_offset: u32) {
        self.emit_op(Bytecode::InitSqlNull);
        self.emit_local(dest);
        self.emit_u32(size);
        self.emit_u32(null_offset);
    }

    pub fn emit_val_null_check(
        &mut self,
        op: Bytecode,
        dest: LocalVar,
        value: LocalVar,
        null_offset: u32,
    ) {
        debug_assert!(matches!(op, Bytecode::ValIsNull | Bytecode::ValIsNotNull));
        self.emit_op(op);
        self.emit_local(dest);
        self.emit_local(value);
        self.emit_u32(null_offset);
    }

    // ---------------------------------------------------------------
    // Jumps
    // ---------------------------------------------------------------

    /// Bind `label` to the current position, patching all pending forward
    /// referrers in place.
    pub fn bind(&mut self, label: &mut BytecodeLabel) {
        debug_assert!(!label.is_bound(), "labels bind exactly once");
        let target = self.position();
        for &referrer in &label.referrer_offsets {
            debug_assert!(referrer < target);
            let delta = (target - referrer) as i32;
            self.bytecode[referrer..referrer + 4].copy_from_slice(&delta.to_le_bytes());
        }
        label.referrer_offsets.clear();
        label.bound_offset = Some(target);
    }

    fn emit_jump_offset(&mut self, label: &mut BytecodeLabel) {
        let here = self.position();
        match label.bound_offset {
            Some(target) => {
                // Backward jump: the delta is known now.
                let delta = -((here - target) as i64) as i32;
                self.emit_u32(delta as u32);
            }
            None => {
                // Forward jump: placeholder now, patch at bind time.
                label.referrer_offsets.push(here);
                self.emit_u32(JUMP_PLACEHOLDER as u32);
            }
        }
    }

    pub fn emit_jump(&mut self, label: &mut BytecodeLabel) {
        self.emit_op(Bytecode::Jump);
        self.emit_jump_offset(label);
    }

    pub fn emit_conditional_jump(
        &mut self,
        op: Bytecode,
        cond: LocalVar,
        label: &mut BytecodeLabel,
    ) {
        debug_assert!(matches!(op, Bytecode::JumpIfTrue | Bytecode::JumpIfFalse));
        self.emit_op(op);
        self.emit_local(cond);
        self.emit_jump_offset(label);
    }

    // ---------------------------------------------------------------
    // Calls and returns
    // ---------------------------------------------------------------

    /// `Call fid, argc, args...`; arguments are passed by LocalVar.
    pub fn emit_call(&mut self, func_id: FunctionId, args: &[LocalVar]) {
        debug_assert!(args.len() < usize::from(u16::MAX));
        self.emit_op(Bytecode::Call);
        self.emit_u16(func_id);
        self.emit_u16(args.len() as u16);
        for &arg in args {
            self.emit_local(arg);
        }
    }

    pub fn emit_return(&mut self) {
        self.emit_op(Bytecode::Return);
    }

    // ---------------------------------------------------------------
    // Specialized emissions
    // ---------------------------------------------------------------

    pub fn emit_init_string(&mut self, dest: LocalVar, pool_index: u32) {
        self.emit_op(Bytecode::InitString);
        self.emit_local(dest);
        self.emit_u32(pool_index);
    }

    pub fn emit_table_iter_init(&mut self, iter: LocalVar, exec_ctx: LocalVar, table_id: u16) {
        self.emit_op(Bytecode::TableVectorIteratorInit);
        self.emit_local(iter);
        self.emit_local(exec_ctx);
        self.emit_u16(table_id);
    }

    pub fn emit_parallel_scan(
        &mut self,
        table_id: u16,
        query_state: LocalVar,
        tls: LocalVar,
        scan_fn: FunctionId,
    ) {
        self.emit_op(Bytecode::ParallelScanTable);
        self.emit_u16(table_id);
        self.emit_local(query_state);
        self.emit_local(tls);
        self.emit_u16(scan_fn);
    }

    pub fn emit_vpi_get(&mut self, op: Bytecode, dest: LocalVar, vpi: LocalVar, col_idx: u16) {
        self.emit_op(op);
        self.emit_local(dest);
        self.emit_local(vpi);
        self.emit_u16(col_idx);
    }

    pub fn emit_vpi_set(&mut self, op: Bytecode, vpi: LocalVar, src: LocalVar, col_idx: u16) {
        self.emit_op(op);
        self.emit_local(vpi);
        self.emit_local(src);
        self.emit_u16(col_idx);
    }

    pub fn emit_filter_manager_insert_term(&mut self, fm: LocalVar, term_fn: FunctionId) {
        self.emit_op(Bytecode::FilterManagerInsertClauseTerm);
        self.emit_local(fm);
        self.emit_u16(term_fn);
    }

    pub fn emit_agg_ht_lookup(
        &mut self,
        dest: LocalVar,
        agg_ht: LocalVar,
        hash: LocalVar,
        key_eq_fn: FunctionId,
        probe: LocalVar,
    ) {
        self.emit_op(Bytecode::AggregationHashTableLookup);
        self.emit_local(dest);
        self.emit_local(agg_ht);
        self.emit_local(hash);
        self.emit_u16(key_eq_fn);
        self.emit_local(probe);
    }

    pub fn emit_agg_ht_process_batch(
        &mut self,
        agg_ht: LocalVar,
        vpi: LocalVar,
        num_keys: u16,
        key_cols: LocalVar,
        init_fn: FunctionId,
        merge_fn: FunctionId,
        partitioned: LocalVar,
    ) {
        self.emit_op(Bytecode::AggregationHashTableProcessBatch);
        self.emit_local(agg_ht);
        self.emit_local(vpi);
        self.emit_u16(num_keys);
        self.emit_local(key_cols);
        self.emit_u16(init_fn);
        self.emit_u16(merge_fn);
        self.emit_local(partitioned);
    }

    pub fn emit_agg_ht_transfer_partitions(
        &mut self,
        agg_ht: LocalVar,
        tls: LocalVar,
        offset: LocalVar,
        merge_fn: FunctionId,
    ) {
        self.emit_op(Bytecode::AggregationHashTableTransferPartitions);
        self.emit_local(agg_ht);
        self.emit_local(tls);
        self.emit_local(offset);
        self.emit_u16(merge_fn);
    }

    pub fn emit_agg_ht_parallel_scan(
        &mut self,
        agg_ht: LocalVar,
        query_state: LocalVar,
        tls: LocalVar,
        scan_fn: FunctionId,
    ) {
        self.emit_op(Bytecode::AggregationHashTableParallelPartitionedScan);
        self.emit_local(agg_ht);
        self.emit_local(query_state);
        self.emit_local(tls);
        self.emit_u16(scan_fn);
    }

    pub fn emit_sorter_init(
        &mut self,
        sorter: LocalVar,
        exec_ctx: LocalVar,
        cmp_fn: FunctionId,
        tuple_size: LocalVar,
    ) {
        self.emit_op(Bytecode::SorterInit);
        self.emit_local(sorter);
        self.emit_local(exec_ctx);
        self.emit_u16(cmp_fn);
        self.emit_local(tuple_size);
    }

    pub fn emit_tls_reset(
        &mut self,
        tls: LocalVar,
        state_size: LocalVar,
        init_fn: FunctionId,
        destroy_fn: FunctionId,
        ctx: LocalVar,
    ) {
        self.emit_op(Bytecode::ThreadStateContainerReset);
        self.emit_local(tls);
        self.emit_local(state_size);
        self.emit_u16(init_fn);
        self.emit_u16(destroy_fn);
        self.emit_local(ctx);
    }

    pub fn emit_tls_iterate(&mut self, tls: LocalVar, ctx: LocalVar, iterate_fn: FunctionId) {
        self.emit_op(Bytecode::ThreadStateContainerIterate);
        self.emit_local(tls);
        self.emit_local(ctx);
        self.emit_u16(iterate_fn);
    }
}

impl Default for BytecodeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::function_info::AddressMode;

    fn local(offset: u32) -> LocalVar {
        LocalVar::new(offset, AddressMode::Address)
    }

    #[test]
    fn test_emit_simple_instruction() {
        let mut emitter = BytecodeEmitter::new();
        emitter.emit_binary_op(Bytecode::AddI64, local(0), local(8), local(16));
        let buf = emitter.finish();
        // 2-byte opcode + three 4-byte locals.
        assert_eq!(buf.len(), 14);
        let op = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(Bytecode::from_u16(op), Some(Bytecode::AddI64));
    }

    #[test]
    fn test_backward_jump_delta() {
        let mut emitter = BytecodeEmitter::new();
        let mut label = BytecodeLabel::new();
        emitter.bind(&mut label);
        emitter.emit_assign_imm4(local(0), 7);
        let jump_offset_pos = emitter.position() + 2;
        emitter.emit_jump(&mut label);
        let buf = emitter.finish();
        let delta = i32::from_le_bytes(
            buf[jump_offset_pos..jump_offset_pos + 4]
                .try_into()
                .expect("4 bytes"),
        );
        // Offset counts from the start of the offset field back to position 0.
        assert_eq!(delta, -(jump_offset_pos as i32));
    }

    #[test]
    fn test_forward_jump_patching() {
        let mut emitter = BytecodeEmitter::new();
        let mut label = BytecodeLabel::new();
        let jump_offset_pos = emitter.position() + 2;
        emitter.emit_jump(&mut label);
        emitter.emit_assign_imm8(local(0), 42);
        emitter.bind(&mut label);
        let target = label.offset().expect("bound");
        let buf = emitter.finish();
        let delta = i32::from_le_bytes(
            buf[jump_offset_pos..jump_offset_pos + 4]
                .try_into()
                .expect("4 bytes"),
        );
        assert_eq!(delta as usize, target - jump_offset_pos);
    }

    #[test]
    fn test_multiple_forward_referrers_all_patched() {
        let mut emitter = BytecodeEmitter::new();
        let mut label = BytecodeLabel::new();
        let first = emitter.position() + 2;
        emitter.emit_jump(&mut label);
        let second = emitter.position() + 2 + 4;
        emitter.emit_conditional_jump(Bytecode::JumpIfTrue, local(4), &mut label);
        emitter.bind(&mut label);
        let target = label.offset().expect("bound");
        let buf = emitter.finish();
        for referrer in [first, second] {
            let delta =
                i32::from_le_bytes(buf[referrer..referrer + 4].try_into().expect("4 bytes"));
            assert_eq!(delta as usize, target - referrer);
        }
    }

    #[test]
    fn test_call_encoding() {
        let mut emitter = BytecodeEmitter::new();
        emitter.emit_call(3, &[local(0), local(8)]);
        let buf = emitter.finish();
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 3);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 2);
        assert_eq!(buf.len(), 2 + 2 + 2 + 8);
    }
}
