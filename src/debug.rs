use crate::{Chunk, Function, OpCode};

/// Renders a chunk as one line per instruction, headed by `name`.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut lines = vec![format!("== {} ==", name)];
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_instruction(chunk, offset);
        lines.push(line);
        offset = next;
    }
    lines.join("\n")
}

/// Renders the instruction at `offset`, returning it with the offset of the
/// next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let line = match (offset, chunk.lines.get(offset)) {
        (0, Some(line)) => format!("{:>4}", line),
        (_, Some(line)) if chunk.lines.get(offset - 1) == Some(line) => "   |".to_string(),
        (_, Some(line)) => format!("{:>4}", line),
        (_, None) => "   ?".to_string(),
    };
    let prefix = format!("{:0>4} {}", offset, line);

    let opcode = match chunk.code.get(offset).map(|byte| OpCode::try_from(*byte)) {
        Some(Ok(opcode)) => opcode,
        Some(Err(byte)) => return (format!("{} Unknown opcode {}", prefix, byte), offset + 1),
        None => return (format!("{} <end of chunk>", prefix), offset + 1),
    };

    let operand = match chunk.code.get(offset + 1) {
        Some(operand) if opcode.operand_count() == 1 => *operand,
        _ => return (format!("{} {}", prefix, opcode), offset + 1),
    };

    let text = match opcode {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal => {
            match chunk.constants.get(operand as usize) {
                Some(value) => format!("{} {:<16} {:>4} '{}'", prefix, opcode, operand, value),
                None => format!("{} {:<16} {:>4} <missing>", prefix, opcode, operand),
            }
        }
        _ => format!("{} {:<16} {:>4}", prefix, opcode, operand),
    };
    (text, offset + 2)
}

/// Disassembles `function` followed by every function nested in its
/// constant pool.
pub fn disassemble_function(function: &Function) -> String {
    let mut listings = vec![disassemble_chunk(&function.chunk, function.display_name())];
    for constant in function.chunk.constants.iter() {
        if let Some(nested) = constant.as_function() {
            listings.push(disassemble_function(nested));
        }
    }
    listings.join("\n\n")
}
