//! 控制台配置
//!
//! TOML 文档，启动时加载一次。所有错误都是致命的（[`ConfigError`]），
//! 只有 `scaling × gearbox = 0` 例外：记录警告并按 1 处理。
//!
//! ```toml
//! [controller]
//! type = "direct"          # direct | serial | datagram
//!
//! [direct]
//! address = "192.168.1.2"
//!
//! [axes.A]
//! min = 0.0
//! max = 180.0
//! pulses = 10000
//! degrees = 360
//! scaling = 500
//! gearbox = 4
//! # ... B 到 H
//! ```

use serde::Deserialize;
use servo_driver::PollingConfig;
use servo_protocol::{AxisCalibration, AxisId, CommandDialect};
use servo_transport::TransportConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// 配置错误（启动时致命）
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown controller type '{0}' (expected direct, serial or datagram)")]
    UnknownControllerType(String),

    #[error("Unknown command dialect '{0}' (expected galil or clearcore)")]
    UnknownDialect(String),

    #[error("Missing [{0}] section")]
    MissingSection(&'static str),

    #[error("Missing calibration for axis {0}")]
    MissingAxis(AxisId),

    #[error("Unknown axis section '{0}'")]
    UnknownAxis(String),

    #[error("Axis {axis} is configured twice ([axes.{first}] and [axes.{second}])")]
    DuplicateAxis {
        axis: AxisId,
        first: String,
        second: String,
    },

    #[error("Invalid calibration for axis {axis}: {reason}")]
    InvalidAxis { axis: AxisId, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// 轮询参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub period_ms: u64,
    /// 连续多少次无效位置回复后显示“不可用”
    pub unavailable_after: u32,
    pub reply_timeout_ms: u64,
    pub position_attempts: u32,
    pub telemetry_attempts: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            period_ms: 200,
            unavailable_after: 5,
            reply_timeout_ms: 200,
            position_attempts: 5,
            telemetry_attempts: 3,
        }
    }
}

impl PollingSettings {
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            period: Duration::from_millis(self.period_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            position_attempts: self.position_attempts,
            telemetry_attempts: self.telemetry_attempts,
            ..PollingConfig::default()
        }
    }
}

/// 运动参数上限（工程单位）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionLimits {
    /// 度/秒，同时是点动回退限速的基准
    pub max_speed: f64,
    pub max_accel: f64,
    pub max_decel: f64,
    /// 位于下限时反向点动的限速比例
    pub creep_back_fraction: f64,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_speed: 360.0,
            max_accel: 3600.0,
            max_decel: 3600.0,
            creep_back_fraction: 0.1,
        }
    }
}

impl MotionLimits {
    /// 点动回退速度上限（度/秒）
    pub fn creep_back_speed(&self) -> f64 {
        self.max_speed * self.creep_back_fraction
    }
}

/// 已校验的控制台配置
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    pub transport: TransportConfig,
    pub dialect: CommandDialect,
    pub polling: PollingSettings,
    pub limits: MotionLimits,
    pub axes: [AxisCalibration; AxisId::COUNT],
}

impl ConsoleConfig {
    /// 使用兜底标定与默认参数
    pub fn with_transport(transport: TransportConfig) -> Self {
        let dialect = default_dialect(&transport);
        Self {
            transport,
            dialect,
            polling: PollingSettings::default(),
            limits: MotionLimits::default(),
            axes: [AxisCalibration::fallback(); AxisId::COUNT],
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        raw.validate()
    }

    pub fn calibration(&self, axis: AxisId) -> &AxisCalibration {
        &self.axes[axis.index()]
    }
}

fn default_dialect(transport: &TransportConfig) -> CommandDialect {
    match transport {
        TransportConfig::Datagram { .. } => CommandDialect::ClearCore,
        _ => CommandDialect::Galil,
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    controller: RawController,
    direct: Option<RawDirect>,
    serial: Option<RawSerial>,
    datagram: Option<RawDatagram>,
    #[serde(default)]
    polling: PollingSettings,
    #[serde(default)]
    limits: MotionLimits,
    #[serde(default)]
    axes: BTreeMap<String, RawAxis>,
}

#[derive(Debug, Deserialize)]
struct RawController {
    #[serde(rename = "type")]
    kind: String,
    dialect: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDirect {
    address: String,
    #[serde(default = "default_direct_timeout_ms")]
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawSerial {
    port: String,
    #[serde(default = "default_baudrate")]
    baudrate: u32,
    /// 秒
    #[serde(default = "default_serial_timeout")]
    timeout: f64,
}

#[derive(Debug, Deserialize)]
struct RawDatagram {
    remote: String,
    #[serde(default = "default_local")]
    local: String,
}

#[derive(Debug, Deserialize)]
struct RawAxis {
    min: f64,
    max: f64,
    pulses: f64,
    degrees: f64,
    scaling: f64,
    gearbox: f64,
}

fn default_direct_timeout_ms() -> u64 {
    1000
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_serial_timeout() -> f64 {
    0.1
}

fn default_local() -> String {
    "0.0.0.0:8889".to_string()
}

impl RawConfig {
    fn validate(self) -> Result<ConsoleConfig, ConfigError> {
        let transport = match self.controller.kind.trim().to_ascii_lowercase().as_str() {
            "direct" => {
                let direct = self.direct.ok_or(ConfigError::MissingSection("direct"))?;
                TransportConfig::Direct {
                    address: direct.address,
                    timeout: Duration::from_millis(direct.timeout_ms),
                }
            },
            "serial" => {
                let serial = self.serial.ok_or(ConfigError::MissingSection("serial"))?;
                let invalid_timeout = || ConfigError::InvalidValue {
                    field: "serial.timeout",
                    reason: format!("{} is not a positive number of seconds", serial.timeout),
                };
                if serial.timeout <= 0.0 {
                    return Err(invalid_timeout());
                }
                let timeout =
                    Duration::try_from_secs_f64(serial.timeout).map_err(|_| invalid_timeout())?;
                TransportConfig::Serial {
                    port: serial.port,
                    baud_rate: serial.baudrate,
                    timeout,
                }
            },
            "datagram" => {
                let datagram = self.datagram.ok_or(ConfigError::MissingSection("datagram"))?;
                TransportConfig::Datagram {
                    remote: datagram.remote,
                    local: datagram.local,
                }
            },
            other => return Err(ConfigError::UnknownControllerType(other.to_string())),
        };

        let dialect = match self.controller.dialect.as_deref().map(str::trim) {
            None => default_dialect(&transport),
            Some(d) if d.eq_ignore_ascii_case("galil") => CommandDialect::Galil,
            Some(d) if d.eq_ignore_ascii_case("clearcore") => CommandDialect::ClearCore,
            Some(d) => return Err(ConfigError::UnknownDialect(d.to_string())),
        };

        validate_polling(&self.polling)?;
        validate_limits(&self.limits)?;

        // `A` 与 `1` 指向同一轴，记录键名用于报告重复
        let mut axes: [Option<(String, AxisCalibration)>; AxisId::COUNT] = Default::default();
        for (key, raw) in self.axes {
            let axis = key
                .parse::<AxisId>()
                .map_err(|_| ConfigError::UnknownAxis(key.clone()))?;
            if let Some((first, _)) = &axes[axis.index()] {
                return Err(ConfigError::DuplicateAxis {
                    axis,
                    first: first.clone(),
                    second: key,
                });
            }
            let calibration = raw.validate(axis)?;
            axes[axis.index()] = Some((key, calibration));
        }

        let mut calibrations = [AxisCalibration::fallback(); AxisId::COUNT];
        for axis in AxisId::all() {
            calibrations[axis.index()] = axes[axis.index()]
                .as_ref()
                .map(|(_, calibration)| *calibration)
                .ok_or(ConfigError::MissingAxis(axis))?;
        }

        Ok(ConsoleConfig {
            transport,
            dialect,
            polling: self.polling,
            limits: self.limits,
            axes: calibrations,
        })
    }
}

impl RawAxis {
    fn validate(self, axis: AxisId) -> Result<AxisCalibration, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAxis { axis, reason };

        let values = [
            ("min", self.min),
            ("max", self.max),
            ("pulses", self.pulses),
            ("degrees", self.degrees),
            ("scaling", self.scaling),
            ("gearbox", self.gearbox),
        ];
        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!("{name} = {value} is not finite")));
        }
        if self.scaling < 0.0 || self.gearbox < 0.0 {
            return Err(invalid(format!(
                "scaling ({}) and gearbox ({}) must not be negative",
                self.scaling, self.gearbox
            )));
        }
        if self.min > self.max {
            return Err(invalid(format!("min ({}) > max ({})", self.min, self.max)));
        }
        if self.scaling * self.gearbox == 0.0 {
            warn!(
                "Axis {}: scaling × gearbox is 0, treating the conversion factor as 1",
                axis
            );
        }

        Ok(AxisCalibration {
            min_degrees: self.min,
            max_degrees: self.max,
            pulses_per_revolution: self.pulses,
            degrees_per_revolution: self.degrees,
            scaling_pulses_per_degree: self.scaling,
            gearbox_ratio: self.gearbox,
        })
    }
}

fn validate_polling(polling: &PollingSettings) -> Result<(), ConfigError> {
    if polling.period_ms == 0 {
        return Err(ConfigError::InvalidValue {
            field: "polling.period_ms",
            reason: "must be greater than 0".into(),
        });
    }
    if polling.unavailable_after == 0 {
        return Err(ConfigError::InvalidValue {
            field: "polling.unavailable_after",
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

fn validate_limits(limits: &MotionLimits) -> Result<(), ConfigError> {
    let positive = [
        ("limits.max_speed", limits.max_speed),
        ("limits.max_accel", limits.max_accel),
        ("limits.max_decel", limits.max_decel),
    ];
    for (field, value) in positive {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field,
                reason: format!("{value} is not a positive number"),
            });
        }
    }
    if !(0.0..=1.0).contains(&limits.creep_back_fraction) {
        return Err(ConfigError::InvalidValue {
            field: "limits.creep_back_fraction",
            reason: format!("{} is outside 0..=1", limits.creep_back_fraction),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn axes_toml(skip: Option<char>) -> String {
        let mut out = String::new();
        for axis in AxisId::all() {
            if Some(axis.letter()) == skip {
                continue;
            }
            out.push_str(&format!(
                "[axes.{}]\nmin = 0.0\nmax = 180.0\npulses = 10000\ndegrees = 360\nscaling = 500\ngearbox = 4\n\n",
                axis.letter()
            ));
        }
        out
    }

    fn direct_toml() -> String {
        format!(
            "[controller]\ntype = \"direct\"\n\n[direct]\naddress = \"192.168.1.2\"\n\n{}",
            axes_toml(None)
        )
    }

    #[test]
    fn test_load_direct_config() {
        let config = ConsoleConfig::from_toml_str(&direct_toml()).unwrap();
        assert_eq!(
            config.transport,
            TransportConfig::Direct {
                address: "192.168.1.2".into(),
                timeout: Duration::from_millis(1000),
            }
        );
        assert_eq!(config.dialect, CommandDialect::Galil);
        assert_eq!(config.polling, PollingSettings::default());
        assert_eq!(config.limits, MotionLimits::default());
        let a = config.calibration(AxisId::A);
        assert_eq!(a.pulses_per_degree(), 2000.0);
        assert_eq!(a.max_degrees, 180.0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", direct_toml()).unwrap();
        let config = ConsoleConfig::load(file.path()).unwrap();
        assert_eq!(config.axes.len(), 8);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            ConsoleConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_datagram_defaults_to_clearcore() {
        let text = format!(
            "[controller]\ntype = \"datagram\"\n\n[datagram]\nremote = \"192.168.1.151:8888\"\n\n[polling]\nperiod_ms = 250\n\n{}",
            axes_toml(None)
        );
        let config = ConsoleConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.dialect, CommandDialect::ClearCore);
        assert_eq!(config.polling.period_ms, 250);
        assert_eq!(config.polling.unavailable_after, 5);
        assert_eq!(
            config.transport,
            TransportConfig::Datagram {
                remote: "192.168.1.151:8888".into(),
                local: "0.0.0.0:8889".into(),
            }
        );
        let polling = config.polling.polling_config();
        assert_eq!(polling.period, Duration::from_millis(250));
    }

    #[test]
    fn test_serial_section() {
        let text = format!(
            "[controller]\ntype = \"Serial\"\n\n[serial]\nport = \"/dev/ttyUSB0\"\nbaudrate = 9600\ntimeout = 0.5\n\n{}",
            axes_toml(None)
        );
        let config = ConsoleConfig::from_toml_str(&text).unwrap();
        assert_eq!(
            config.transport,
            TransportConfig::Serial {
                port: "/dev/ttyUSB0".into(),
                baud_rate: 9600,
                timeout: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn test_serial_timeout_out_of_range() {
        for timeout in ["1e30", "-1.0", "0.0", "nan", "inf"] {
            let text = format!(
                "[controller]\ntype = \"serial\"\n\n[serial]\nport = \"COM3\"\ntimeout = {timeout}\n\n{}",
                axes_toml(None)
            );
            assert!(
                matches!(
                    ConsoleConfig::from_toml_str(&text),
                    Err(ConfigError::InvalidValue { field: "serial.timeout", .. })
                ),
                "timeout = {timeout} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_axis_keys() {
        let text = format!(
            "{}[axes.1]\nmin = 0\nmax = 90\npulses = 1\ndegrees = 1\nscaling = 1\ngearbox = 1\n",
            direct_toml()
        );
        match ConsoleConfig::from_toml_str(&text) {
            Err(ConfigError::DuplicateAxis { axis, first, second }) => {
                assert_eq!(axis, AxisId::A);
                assert_eq!((first.as_str(), second.as_str()), ("1", "A"));
            },
            other => panic!("expected duplicate axis error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_axis_is_fatal() {
        let text = format!(
            "[controller]\ntype = \"direct\"\n\n[direct]\naddress = \"10.0.0.1\"\n\n{}",
            axes_toml(Some('E'))
        );
        assert!(matches!(
            ConsoleConfig::from_toml_str(&text),
            Err(ConfigError::MissingAxis(axis)) if axis == AxisId::E
        ));
    }

    #[test]
    fn test_fatal_errors() {
        let unknown = direct_toml().replace("type = \"direct\"", "type = \"canbus\"");
        assert!(matches!(
            ConsoleConfig::from_toml_str(&unknown),
            Err(ConfigError::UnknownControllerType(_))
        ));

        let no_section = format!("[controller]\ntype = \"serial\"\n\n{}", axes_toml(None));
        assert!(matches!(
            ConsoleConfig::from_toml_str(&no_section),
            Err(ConfigError::MissingSection("serial"))
        ));

        let negative = direct_toml().replacen("gearbox = 4", "gearbox = -4", 1);
        assert!(matches!(
            ConsoleConfig::from_toml_str(&negative),
            Err(ConfigError::InvalidAxis { axis, .. }) if axis == AxisId::A
        ));

        let inverted = direct_toml().replacen("min = 0.0", "min = 200.0", 1);
        assert!(matches!(
            ConsoleConfig::from_toml_str(&inverted),
            Err(ConfigError::InvalidAxis { .. })
        ));

        let extra = format!("{}[axes.J]\nmin = 0\nmax = 1\npulses = 1\ndegrees = 1\nscaling = 1\ngearbox = 1\n", direct_toml());
        assert!(matches!(
            ConsoleConfig::from_toml_str(&extra),
            Err(ConfigError::UnknownAxis(_))
        ));

        assert!(matches!(
            ConsoleConfig::from_toml_str("not toml ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_factor_accepted() {
        let text = direct_toml().replacen("scaling = 500", "scaling = 0", 1);
        let config = ConsoleConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.calibration(AxisId::A).pulses_per_degree(), 1.0);
    }

    #[test]
    fn test_invalid_limits() {
        let text = format!("{}\n[limits]\ncreep_back_fraction = 1.5\n", direct_toml());
        assert!(matches!(
            ConsoleConfig::from_toml_str(&text),
            Err(ConfigError::InvalidValue { field: "limits.creep_back_fraction", .. })
        ));
    }
}
