// SPDX-License-Identifier: CEPL-1.0
//! Just enough SPIR-V parsing to reject a binary before it reaches the driver:
//! header checks and the entry-point table.
use crate::error::SpirvError;
use crate::shader::ShaderStage;

pub const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;
const OP_ENTRY_POINT: u32 = 15;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: u32,
    pub name: String,
}

/// A SPIR-V module in host word order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpirvModule {
    words: Vec<u32>,
}

impl SpirvModule {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpirvError> {
        if bytes.len() % 4 != 0 {
            return Err(SpirvError::Misaligned { len: bytes.len() });
        }
        let mut words: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
        match words.first().copied() {
            Some(MAGIC) => {}
            Some(m) if m.swap_bytes() == MAGIC => {
                for w in &mut words {
                    *w = w.swap_bytes();
                }
            }
            Some(found) if words.len() >= HEADER_WORDS => {
                return Err(SpirvError::BadMagic { found })
            }
            _ => {}
        }
        Self::from_words(words)
    }

    pub fn from_words(words: Vec<u32>) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::Truncated { words: words.len() });
        }
        if words[0] != MAGIC {
            return Err(SpirvError::BadMagic { found: words[0] });
        }
        Ok(Self { words })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn entry_points(&self) -> Result<Vec<EntryPoint>, SpirvError> {
        let mut out = Vec::new();
        let mut at = HEADER_WORDS;
        while at < self.words.len() {
            let head = self.words[at];
            let count = (head >> 16) as usize;
            let opcode = head & 0xffff;
            if count == 0 || at + count > self.words.len() {
                return Err(SpirvError::MalformedInstruction { offset: at });
            }
            if opcode == OP_ENTRY_POINT {
                // model, function id, literal name...
                if count < 4 {
                    return Err(SpirvError::MalformedInstruction { offset: at });
                }
                let operands = &self.words[at + 1..at + count];
                out.push(EntryPoint {
                    execution_model: operands[0],
                    name: literal_string(&operands[2..]),
                });
            }
            at += count;
        }
        Ok(out)
    }

    /// Ensures the module can be bound to `stage` under the entry point `name`.
    pub fn require_entry_point(&self, stage: ShaderStage, name: &str) -> Result<(), SpirvError> {
        let found = self
            .entry_points()?
            .iter()
            .any(|e| e.execution_model == stage.execution_model() && e.name == name);
        if found {
            Ok(())
        } else {
            Err(SpirvError::MissingEntryPoint {
                stage,
                name: name.to_owned(),
            })
        }
    }
}

fn literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal module: header plus a single `OpEntryPoint <model> %1 "main"`.
    pub(crate) fn module_words(stage: ShaderStage) -> Vec<u32> {
        let name = u32::from_le_bytes(*b"main");
        vec![
            MAGIC,
            0x0001_0000,
            0,
            8,
            0,
            (5 << 16) | OP_ENTRY_POINT,
            stage.execution_model(),
            1,
            name,
            0,
        ]
    }

    pub(crate) fn module_bytes(stage: ShaderStage) -> Vec<u8> {
        bytemuck::cast_slice(&module_words(stage)).to_vec()
    }

    #[test]
    fn reads_entry_points() {
        let m = SpirvModule::from_bytes(&module_bytes(ShaderStage::Fragment)).unwrap();
        let eps = m.entry_points().unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].name, "main");
        assert_eq!(eps[0].execution_model, ShaderStage::Fragment.execution_model());
    }

    #[test]
    fn stage_mismatch_is_rejected() {
        let m = SpirvModule::from_bytes(&module_bytes(ShaderStage::Geometry)).unwrap();
        assert!(m.require_entry_point(ShaderStage::Geometry, "main").is_ok());
        assert!(matches!(
            m.require_entry_point(ShaderStage::Fragment, "main"),
            Err(SpirvError::MissingEntryPoint {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
    }

    #[test]
    fn accepts_opposite_endianness() {
        let swapped: Vec<u8> = module_words(ShaderStage::Vertex)
            .iter()
            .flat_map(|w| w.swap_bytes().to_ne_bytes())
            .collect();
        let m = SpirvModule::from_bytes(&swapped).unwrap();
        assert_eq!(m.words()[0], MAGIC);
        assert!(m.require_entry_point(ShaderStage::Vertex, "main").is_ok());
    }

    #[test]
    fn reads_words_from_an_unaligned_buffer() {
        let mut padded = vec![0u8];
        padded.extend(module_bytes(ShaderStage::Fragment));
        let m = SpirvModule::from_bytes(&padded[1..]).unwrap();
        assert_eq!(m.words(), module_words(ShaderStage::Fragment).as_slice());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            SpirvModule::from_bytes(&[1, 2, 3]),
            Err(SpirvError::Misaligned { len: 3 })
        ));
        assert!(matches!(
            SpirvModule::from_bytes(&[0; 8]),
            Err(SpirvError::Truncated { words: 2 })
        ));
        let mut words = module_words(ShaderStage::Fragment);
        words[0] = 0xdead_beef;
        assert!(matches!(
            SpirvModule::from_words(words),
            Err(SpirvError::BadMagic { found: 0xdead_beef })
        ));
    }

    #[test]
    fn rejects_instruction_running_past_the_end() {
        let mut words = module_words(ShaderStage::Fragment);
        words[5] = (9 << 16) | OP_ENTRY_POINT;
        let m = SpirvModule::from_words(words).unwrap();
        assert!(matches!(
            m.entry_points(),
            Err(SpirvError::MalformedInstruction { offset: 5 })
        ));
    }
}
