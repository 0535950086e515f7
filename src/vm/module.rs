//! A compiled bytecode module: the function table, the flat instruction
//! buffer shared by all functions, and the constant-string pool. Modules are
//! in-memory only; they live exactly as long as the query that compiled them.

use super::bytecodes::{Bytecode, OperandType};
use super::function_info::{FunctionId, FunctionInfo, LocalVar};

#[derive(Debug)]
pub struct BytecodeModule {
    name: String,
    functions: Vec<FunctionInfo>,
    bytecode: Vec<u8>,
    string_pool: Vec<String>,
}

impl BytecodeModule {
    pub fn new(
        name: impl Into<String>,
        functions: Vec<FunctionInfo>,
        bytecode: Vec<u8>,
        string_pool: Vec<String>,
    ) -> Self {
        BytecodeModule {
            name: name.into(),
            functions,
            bytecode,
            string_pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(usize::from(id))
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// The instruction bytes of one function.
    pub fn bytecode_for(&self, func: &FunctionInfo) -> &[u8] {
        let (start, end) = func.bytecode_range();
        &self.bytecode[start..end]
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.string_pool.get(index as usize).map(String::as_str)
    }

    /// Disassemble the whole module, one function at a time. Used by the
    /// CLI's verbose mode.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for func in &self.functions {
            out.push_str(&format!(
                "fn {} (id={}, frame={} bytes, params={}):\n",
                func.name(),
                func.id(),
                func.frame_size(),
                func.num_params(),
            ));
            for info in func.locals() {
                out.push_str(&format!(
                    "  local {:<12} offset={:<4} size={}\n",
                    info.name, info.offset, info.size
                ));
            }
            self.disassemble_function(func, &mut out);
        }
        out
    }

    fn disassemble_function(&self, func: &FunctionInfo, out: &mut String) {
        let code = self.bytecode_for(func);
        let mut pc = 0usize;
        while pc < code.len() {
            let raw = u16::from_le_bytes([code[pc], code[pc + 1]]);
            let Some(op) = Bytecode::from_u16(raw) else {
                out.push_str(&format!("  {pc:06}  <bad opcode {raw}>\n"));
                return;
            };
            out.push_str(&format!("  {:06}  {:<40}", pc, op.name()));
            pc += 2;
            for &operand in op.operands() {
                match operand {
                    OperandType::Local => {
                        let enc =
                            u32::from_le_bytes(code[pc..pc + 4].try_into().unwrap_or_default());
                        let local = LocalVar::decode(enc);
                        out.push_str(&format!(" local+{}", local.offset()));
                    }
                    OperandType::Imm1 => out.push_str(&format!(" {}", code[pc] as i8)),
                    OperandType::Imm2 => {
                        let v =
                            i16::from_le_bytes(code[pc..pc + 2].try_into().unwrap_or_default());
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::Imm4 | OperandType::JumpOffset => {
                        let v =
                            i32::from_le_bytes(code[pc..pc + 4].try_into().unwrap_or_default());
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::Imm8 => {
                        let v =
                            i64::from_le_bytes(code[pc..pc + 8].try_into().unwrap_or_default());
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::FImm4 => {
                        let v = f32::from_bits(u32::from_le_bytes(
                            code[pc..pc + 4].try_into().unwrap_or_default(),
                        ));
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::FImm8 => {
                        let v = f64::from_bits(u64::from_le_bytes(
                            code[pc..pc + 8].try_into().unwrap_or_default(),
                        ));
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::UImm16 | OperandType::FunctionId => {
                        let v =
                            u16::from_le_bytes(code[pc..pc + 2].try_into().unwrap_or_default());
                        out.push_str(&format!(" {v}"));
                    }
                    OperandType::UImm32 => {
                        let v =
                            u32::from_le_bytes(code[pc..pc + 4].try_into().unwrap_or_default());
                        out.push_str(&format!(" {v}"));
                    }
                }
                pc += operand.size();
            }
            // Calls carry a trailing list of `argc` locals.
            if op == Bytecode::Call {
                let argc_pos = pc - 2;
                let argc =
                    u16::from_le_bytes(code[argc_pos..argc_pos + 2].try_into().unwrap_or_default());
                for _ in 0..argc {
                    let enc = u32::from_le_bytes(code[pc..pc + 4].try_into().unwrap_or_default());
                    out.push_str(&format!(" local+{}", LocalVar::decode(enc).offset()));
                    pc += 4;
                }
            }
            out.push('\n');
        }
    }
}
