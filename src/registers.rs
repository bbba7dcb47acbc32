//! Control register bank
//!
//! Twelve 32-bit registers mirrored to the FPGA. The control layer writes them by
//! name or index; the transmitter snapshots the whole bank every tick.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const REGISTER_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegisterDefinition {
    pub name: &'static str,
    pub default: u32,
    pub description: &'static str,
}

// Index order is the wire order
pub const REGISTERS: [RegisterDefinition; REGISTER_COUNT] = [
    RegisterDefinition {
        name: "mixer_select",
        default: 0,
        description: "Effect selection (0 pass-through .. 6 tremolo)",
    },
    RegisterDefinition {
        name: "vol_left",
        default: 0x3FFF_FFFF,
        description: "Left channel gain",
    },
    RegisterDefinition {
        name: "vol_right",
        default: 0x3FFF_FFFF,
        description: "Right channel gain",
    },
    RegisterDefinition {
        name: "lpf",
        default: 0x1D7B_9A90,
        description: "Low-pass smoothing coefficient",
    },
    RegisterDefinition {
        name: "hpf",
        default: 0x6237_C54F,
        description: "High-pass coefficient",
    },
    RegisterDefinition {
        name: "bpf_low",
        default: 0x1D7B_9A90,
        description: "Band-pass lower edge coefficient",
    },
    RegisterDefinition {
        name: "bpf_high",
        default: 0x6237_C54F,
        description: "Band-pass upper edge coefficient",
    },
    RegisterDefinition {
        name: "bsf",
        default: 0x7BA3_751D,
        description: "Notch coefficient",
    },
    RegisterDefinition {
        name: "distortion",
        default: 11,
        description: "Distortion clipping threshold",
    },
    RegisterDefinition {
        name: "tremolo",
        default: 0x0000_0576,
        description: "Tremolo phase increment",
    },
    RegisterDefinition {
        name: "delay_left",
        default: 0,
        description: "Left channel delay in samples",
    },
    RegisterDefinition {
        name: "delay_right",
        default: 0,
        description: "Right channel delay in samples",
    },
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Unknown register name: {0}")]
    UnknownName(String),
    #[error("Register index {0} out of range (bank has 12 registers)")]
    IndexOutOfRange(usize),
}

/// Register address, either its index or its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterId<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for RegisterId<'_> {
    fn from(index: usize) -> Self {
        RegisterId::Index(index)
    }
}

impl<'a> From<&'a str> for RegisterId<'a> {
    fn from(name: &'a str) -> Self {
        RegisterId::Name(name)
    }
}

impl RegisterId<'_> {
    pub fn resolve(self) -> Result<usize, RegisterError> {
        match self {
            RegisterId::Index(index) if index < REGISTER_COUNT => Ok(index),
            RegisterId::Index(index) => Err(RegisterError::IndexOutOfRange(index)),
            RegisterId::Name(name) => REGISTERS
                .iter()
                .position(|def| def.name == name)
                .ok_or_else(|| RegisterError::UnknownName(name.to_string())),
        }
    }
}

fn defaults() -> [u32; REGISTER_COUNT] {
    REGISTERS.map(|def| def.default)
}

/// Shared register state, guarded by a single lock
#[derive(Debug)]
pub struct RegisterBank {
    values: Mutex<[u32; REGISTER_COUNT]>,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(defaults()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [u32; REGISTER_COUNT]> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` truncated to its low 32 bits
    ///
    /// Negative values wrap, so `-1` stores `0xFFFF_FFFF`.
    pub fn set<'a>(&self, id: impl Into<RegisterId<'a>>, value: i64) -> Result<(), RegisterError> {
        let mut values = self.lock();
        let index = id.into().resolve()?;
        values[index] = value as u32;
        Ok(())
    }

    pub fn get<'a>(&self, id: impl Into<RegisterId<'a>>) -> Result<u32, RegisterError> {
        let values = self.lock();
        let index = id.into().resolve()?;
        Ok(values[index])
    }

    /// Snapshot of every register taken under one lock acquisition
    pub fn dump(&self) -> [u32; REGISTER_COUNT] {
        *self.lock()
    }

    /// Restore every register to its power-on default
    pub fn reset(&self) {
        *self.lock() = defaults();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let bank = RegisterBank::new();
        let values = bank.dump();

        assert_eq!(values[0], 0);
        assert_eq!(values[1], 0x3FFF_FFFF);
        assert_eq!(values[7], 0x7BA3_751D);
        assert_eq!(values[8], 11);
        assert_eq!(values[9], 0x576);
        assert_eq!(bank.get("delay_right"), Ok(0));
    }

    #[test]
    fn test_set_by_name_and_index_alias() {
        let bank = RegisterBank::new();
        bank.set("tremolo", 0x1234).unwrap();
        assert_eq!(bank.get(9_usize), Ok(0x1234));

        bank.set(3_usize, 42).unwrap();
        assert_eq!(bank.get("lpf"), Ok(42));
    }

    #[test]
    fn test_values_are_masked_to_32_bits() {
        let bank = RegisterBank::new();

        bank.set("vol_left", -1).unwrap();
        assert_eq!(bank.get("vol_left"), Ok(0xFFFF_FFFF));

        bank.set("vol_right", 0x1_0000_0005).unwrap();
        assert_eq!(bank.get("vol_right"), Ok(5));
    }

    #[test]
    fn test_unknown_register_is_an_error() {
        let bank = RegisterBank::new();

        assert_eq!(
            bank.set("reverb", 1),
            Err(RegisterError::UnknownName("reverb".to_string()))
        );
        assert_eq!(bank.get(12_usize), Err(RegisterError::IndexOutOfRange(12)));

        // Failed writes leave the bank untouched
        assert_eq!(bank.dump(), RegisterBank::new().dump());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let bank = RegisterBank::new();
        bank.set("distortion", 999).unwrap();
        bank.reset();
        assert_eq!(bank.get("distortion"), Ok(11));
    }

    #[test]
    fn test_concurrent_sets_on_distinct_registers() {
        let bank = Arc::new(RegisterBank::new());

        let handles: Vec<_> = (0..REGISTER_COUNT)
            .map(|index| {
                let bank = Arc::clone(&bank);
                std::thread::spawn(move || {
                    for round in 0..1000i64 {
                        let value = (index as i64) << 40 | round << 8 | index as i64;
                        bank.set(index, value).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let values = bank.dump();
        for (index, &value) in values.iter().enumerate() {
            let last = (index as i64) << 40 | 999 << 8 | index as i64;
            assert_eq!(value, last as u32);
        }
    }

    #[test]
    fn test_register_names_are_unique() {
        for (i, def) in REGISTERS.iter().enumerate() {
            assert_eq!(RegisterId::Name(def.name).resolve(), Ok(i));
        }
    }
}
