//! Register map: which requests to issue and how to turn the answers into a [`Reading`].

use std::collections::HashSet;

use npk_common::Reading;

use crate::codec::MAX_REGISTERS_PER_REQUEST;
use crate::config::{ConfigError, REQUIRED_REGISTERS, RegisterConfig};
use crate::master::AdapterError;

/// Raw value some sensor firmwares report for a failed measurement.
pub const FAULT_SENTINEL: u16 = 0xFFFF;

/// A contiguous block of registers read with a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterGroup {
    pub start: u16,
    pub count: u16,
}

/// Validated register map with its request plan.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    registers: Vec<RegisterConfig>,
    groups: Vec<RegisterGroup>,
}

impl RegisterMap {
    /// Validate `registers` and plan the requests needed to read them.
    pub fn new(registers: &[RegisterConfig]) -> Result<Self, ConfigError> {
        if registers.is_empty() {
            return Err(ConfigError::Validation(
                "At least one register must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for register in registers {
            if register.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Register name cannot be empty".to_string(),
                ));
            }
            if !names.insert(register.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate register name '{}'",
                    register.name
                )));
            }
            if !addresses.insert(register.address) {
                return Err(ConfigError::Validation(format!(
                    "Register '{}': address {:#06x} is already mapped",
                    register.name, register.address
                )));
            }
            if register.is_required() && (register.scale != 1.0 || register.offset != 0.0) {
                return Err(ConfigError::Validation(format!(
                    "Register '{}' is published raw and cannot be scaled",
                    register.name
                )));
            }
        }

        for required in REQUIRED_REGISTERS {
            if !names.contains(required) {
                return Err(ConfigError::Validation(format!(
                    "Missing required register '{}'",
                    required
                )));
            }
        }

        let mut sorted = registers.to_vec();
        sorted.sort_by_key(|r| r.address);
        let groups = plan_groups(sorted.iter().map(|r| r.address));

        Ok(Self {
            registers: sorted,
            groups,
        })
    }

    /// Requests to issue, in order.
    pub fn groups(&self) -> &[RegisterGroup] {
        &self.groups
    }

    /// Registers in address order.
    pub fn registers(&self) -> &[RegisterConfig] {
        &self.registers
    }

    /// Total registers read per poll.
    pub fn register_count(&self) -> usize {
        self.groups.iter().map(|g| g.count as usize).sum()
    }

    /// Map the concatenated group answers onto a reading.
    ///
    /// `raw` must hold the registers of every group, in group order. The
    /// mapping is a pure function of `raw` and `timestamp`.
    pub fn to_reading(&self, raw: &[u16], timestamp: i64) -> Result<Reading, AdapterError> {
        if raw.len() != self.register_count() {
            return Err(AdapterError::RegisterCount {
                expected: self.register_count(),
                actual: raw.len(),
            });
        }

        // Groups are built from the sorted addresses, so the raw
        // registers line up with `self.registers` one to one.
        let mut npk = [0u16; 3];
        let mut extras = Vec::new();
        for (register, &value) in self.registers.iter().zip(raw) {
            check_raw(register, value)?;
            match REQUIRED_REGISTERS
                .iter()
                .position(|name| *name == register.name)
            {
                Some(slot) => npk[slot] = value,
                None => extras.push((
                    register.name.clone(),
                    value as f64 * register.scale + register.offset,
                )),
            }
        }

        let mut reading =
            Reading::new(npk[0], npk[1], npk[2], raw.to_vec()).with_timestamp(timestamp);
        for (name, value) in extras {
            reading = reading.with_extra(name, value);
        }
        Ok(reading)
    }
}

fn check_raw(register: &RegisterConfig, value: u16) -> Result<(), AdapterError> {
    let out_of_range = register.max_raw.is_some_and(|max| value > max);
    if value == FAULT_SENTINEL || out_of_range {
        return Err(AdapterError::SensorFault {
            register: register.name.clone(),
            raw: value,
        });
    }
    Ok(())
}

/// Coalesce sorted, unique addresses into contiguous request blocks.
fn plan_groups(addresses: impl Iterator<Item = u16>) -> Vec<RegisterGroup> {
    let mut groups: Vec<RegisterGroup> = Vec::new();

    for address in addresses {
        match groups.last_mut() {
            Some(group)
                if group.start as u32 + group.count as u32 == address as u32
                    && group.count < MAX_REGISTERS_PER_REQUEST =>
            {
                group.count += 1;
            }
            _ => groups.push(RegisterGroup {
                start: address,
                count: 1,
            }),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npk() -> Vec<RegisterConfig> {
        vec![
            RegisterConfig::new("nitrogen", 0x1E),
            RegisterConfig::new("phosphorus", 0x1F),
            RegisterConfig::new("potassium", 0x20),
        ]
    }

    #[test]
    fn test_npk_is_one_group() {
        let map = RegisterMap::new(&npk()).unwrap();
        assert_eq!(map.groups(), &[RegisterGroup { start: 0x1E, count: 3 }]);
        assert_eq!(map.register_count(), 3);
    }

    #[test]
    fn test_groups_split_on_gaps() {
        let mut registers = npk();
        registers.push(RegisterConfig::new("temperature", 0x12).with_scale(0.1));
        registers.push(RegisterConfig::new("moisture", 0x13).with_scale(0.1));
        registers.push(RegisterConfig::new("ph", 0x06).with_scale(0.1));

        let map = RegisterMap::new(&registers).unwrap();
        assert_eq!(
            map.groups(),
            &[
                RegisterGroup { start: 0x06, count: 1 },
                RegisterGroup { start: 0x12, count: 2 },
                RegisterGroup { start: 0x1E, count: 3 },
            ]
        );
    }

    #[test]
    fn test_groups_respect_request_limit() {
        let groups = plan_groups(0..300u16);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].count, MAX_REGISTERS_PER_REQUEST);
        assert_eq!(groups[1].start, MAX_REGISTERS_PER_REQUEST);
        assert_eq!(groups[2].count, 300 - 2 * MAX_REGISTERS_PER_REQUEST);
    }

    #[test]
    fn test_to_reading_npk() {
        let map = RegisterMap::new(&npk()).unwrap();
        let reading = map.to_reading(&[95, 65, 82], 1000).unwrap();

        assert_eq!(reading.nitrogen, 95);
        assert_eq!(reading.phosphorus, 65);
        assert_eq!(reading.potassium, 82);
        assert_eq!(reading.raw_registers, vec![95, 65, 82]);
        assert_eq!(reading.timestamp, 1000);
    }

    #[test]
    fn test_to_reading_is_deterministic() {
        let mut registers = npk();
        registers.push(RegisterConfig::new("temperature", 0x12).with_scale(0.1));
        let map = RegisterMap::new(&registers).unwrap();
        let raw = [215, 95, 65, 82];

        assert_eq!(
            map.to_reading(&raw, 7).unwrap(),
            map.to_reading(&raw, 7).unwrap()
        );
    }

    #[test]
    fn test_to_reading_scales_extras() {
        let mut registers = npk();
        registers.push(RegisterConfig::new("temperature", 0x12).with_scale(0.1));
        let map = RegisterMap::new(&registers).unwrap();

        // Address order: temperature (0x12) first, then N/P/K.
        let reading = map.to_reading(&[215, 95, 65, 82], 0).unwrap();
        assert_eq!(reading.nitrogen, 95);
        assert!((reading.extras["temperature"] - 21.5).abs() < 1e-9);
    }

    #[test]
    fn test_sentinel_is_sensor_fault() {
        let map = RegisterMap::new(&npk()).unwrap();
        let err = map.to_reading(&[0xFFFF, 65, 82], 0).unwrap_err();

        assert!(matches!(
            err,
            AdapterError::SensorFault { ref register, raw: 0xFFFF } if register == "nitrogen"
        ));
    }

    #[test]
    fn test_max_raw_is_sensor_fault() {
        let mut registers = npk();
        registers[2] = RegisterConfig::new("potassium", 0x20).with_max_raw(1999);
        let map = RegisterMap::new(&registers).unwrap();

        assert!(map.to_reading(&[1, 2, 1999], 0).is_ok());
        assert!(matches!(
            map.to_reading(&[1, 2, 2000], 0),
            Err(AdapterError::SensorFault { .. })
        ));
    }

    #[test]
    fn test_wrong_register_count() {
        let map = RegisterMap::new(&npk()).unwrap();
        assert!(matches!(
            map.to_reading(&[1, 2], 0),
            Err(AdapterError::RegisterCount {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_rejects_duplicates_and_scaled_npk() {
        let mut duplicate = npk();
        duplicate.push(RegisterConfig::new("nitrogen", 0x40));
        assert!(RegisterMap::new(&duplicate).is_err());

        let mut same_address = npk();
        same_address.push(RegisterConfig::new("ec", 0x1E));
        assert!(RegisterMap::new(&same_address).is_err());

        let mut scaled = npk();
        scaled[0] = RegisterConfig::new("nitrogen", 0x1E).with_scale(0.1);
        assert!(RegisterMap::new(&scaled).is_err());
    }
}
