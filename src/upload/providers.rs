// src/upload/providers.rs
//! Upload preconditions polled on every tick

/// Network reachability
pub trait NetworkInfoProvider: Send + Sync {
    fn is_network_available(&self) -> bool;
}

/// Power state snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemInfo {
    pub battery_full_or_charging: bool,
    /// Battery level in percent, `None` when unknown
    pub battery_level: Option<u8>,
    pub power_save_mode: bool,
    pub on_external_power: bool,
}

impl SystemInfo {
    /// Uploading is allowed when charging or above the low battery
    /// threshold, and never in power save mode
    pub fn is_ready(&self, low_battery_threshold: u8) -> bool {
        if self.power_save_mode {
            return false;
        }
        if self.battery_full_or_charging || self.on_external_power {
            return true;
        }
        match self.battery_level {
            Some(level) => level > low_battery_threshold,
            None => true,
        }
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            battery_full_or_charging: false,
            battery_level: None,
            power_save_mode: false,
            on_external_power: true,
        }
    }
}

/// Power state source
pub trait SystemInfoProvider: Send + Sync {
    fn system_info(&self) -> SystemInfo;

    fn is_system_ready(&self, low_battery_threshold: u8) -> bool {
        self.system_info().is_ready(low_battery_threshold)
    }
}

/// Host without network or power constraints
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl NetworkInfoProvider for AlwaysReady {
    fn is_network_available(&self) -> bool {
        true
    }
}

impl SystemInfoProvider for AlwaysReady {
    fn system_info(&self) -> SystemInfo {
        SystemInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_battery(level: u8) -> SystemInfo {
        SystemInfo {
            battery_full_or_charging: false,
            battery_level: Some(level),
            power_save_mode: false,
            on_external_power: false,
        }
    }

    #[test]
    fn test_low_battery_blocks_upload() {
        assert!(!on_battery(5).is_ready(10));
        assert!(!on_battery(10).is_ready(10));
        assert!(on_battery(11).is_ready(10));
    }

    #[test]
    fn test_charging_overrides_low_battery() {
        let info = SystemInfo {
            battery_full_or_charging: true,
            ..on_battery(2)
        };
        assert!(info.is_ready(10));
    }

    #[test]
    fn test_power_save_blocks_upload() {
        let info = SystemInfo {
            power_save_mode: true,
            ..SystemInfo::default()
        };
        assert!(!info.is_ready(10));
        assert!(AlwaysReady.is_system_ready(10));
    }
}
