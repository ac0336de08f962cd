//! Program collaborator
//!
//! Immutable description of script code plus the tag naming the runtime that
//! executes it. The executor never interprets the code itself; it hands it to
//! the VM or to the bridge.

use crate::types::ProgramType;
use crate::vm::Instr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Function exported by an alternate-engine module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    #[serde(default = "default_export")]
    pub export: String,
}

fn default_export() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Code {
    Instructions { instrs: Vec<Instr> },
    Function(FunctionRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    scriptname: String,
    #[serde(rename = "type")]
    program_type: ProgramType,
    code: Code,
}

impl Program {
    pub fn new(scriptname: impl Into<String>, program_type: ProgramType, code: Code) -> Self {
        Self {
            scriptname: scriptname.into(),
            program_type,
            code,
        }
    }

    /// A bytecode program from an instruction listing
    pub fn bytecode(scriptname: impl Into<String>, instrs: Vec<Instr>) -> Self {
        Self::new(scriptname, ProgramType::Bytecode, Code::Instructions { instrs })
    }

    /// A program run by the alternate engine
    pub fn engine(scriptname: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(
            scriptname,
            ProgramType::Engine,
            Code::Function(FunctionRef {
                module: module.into(),
                export: default_export(),
            }),
        )
    }

    /// Load a program description from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read program {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse program {}", path.display()))
    }

    pub fn scriptname(&self) -> &str {
        &self.scriptname
    }

    pub fn program_type(&self) -> ProgramType {
        self.program_type
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn has_program(&self) -> bool {
        match &self.code {
            Code::Instructions { instrs } => !instrs.is_empty(),
            Code::Function(func) => !func.module.is_empty(),
        }
    }

    pub fn function(&self) -> Option<&FunctionRef> {
        match &self.code {
            Code::Function(func) => Some(func),
            Code::Instructions { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_programs_load() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
        for name in ["countdown.json", "listener.json"] {
            let program = Program::from_file(&demos.join(name)).unwrap();
            assert_eq!(program.program_type(), ProgramType::Bytecode);
            assert!(program.has_program());
        }
    }

    #[test]
    fn test_program_from_json() {
        let json = r#"{
            "scriptname": "scripts/greet.ecl",
            "type": "bytecode",
            "code": {
                "t": "Instructions",
                "instrs": [
                    { "t": "Push", "value": { "t": "Str", "v": "hello" } },
                    { "t": "Return" }
                ]
            }
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.scriptname(), "scripts/greet.ecl");
        assert_eq!(program.program_type(), ProgramType::Bytecode);
        assert!(program.has_program());
        assert!(program.function().is_none());
    }

    #[test]
    fn test_engine_program_defaults_export() {
        let json = r#"{
            "scriptname": "scripts/quest.js",
            "type": "engine",
            "code": { "t": "Function", "module": "quest" }
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.function().unwrap().export, "default");
    }

    #[test]
    fn test_empty_listing_has_no_program() {
        let program = Program::bytecode("empty", vec![]);
        assert!(!program.has_program());
    }
}
