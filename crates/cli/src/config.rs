use std::path::Path;

use anyhow::Context;
use intercom_dialog_core::SipOptions;
use intercom_infra_common::{load_toml, LoggingConfig};
use intercom_session_core::SessionConfig;
use serde::Deserialize;

/// Contents of the device TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFile {
    pub sip: SipOptions,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DeviceFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file: DeviceFile =
            load_toml(path).with_context(|| format!("loading device configuration {}", path.display()))?;
        file.session.validate().context("invalid [session] table")?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file() {
        let text = r#"
            [sip]
            from = "sip:ghome@192.168.1.10"
            to = "sip:door@192.168.1.30:5060"
            local_ip = "192.168.1.10"
        "#;
        let file: DeviceFile = toml::from_str(text).unwrap();
        assert_eq!(file.sip.to, "sip:door@192.168.1.30:5060");
        assert_eq!(file.session, SessionConfig::default());
        assert_eq!(file.logging, LoggingConfig::default());
    }

    #[test]
    fn test_all_tables() {
        let text = r#"
            [sip]
            from = "sip:ghome@192.168.1.10"
            to = "sip:door@192.168.1.30:5060"
            local_ip = "192.168.1.10"
            expire = 600
            debug = true

            [session]
            keepalive_interval_ms = 250

            [logging]
            level = "debug"
            json = true
        "#;
        let file: DeviceFile = toml::from_str(text).unwrap();
        assert_eq!(file.sip.expire, 600);
        assert!(file.sip.debug);
        assert_eq!(file.session.keepalive_interval_ms, 250);
        assert_eq!(file.logging.level, "debug");
        assert!(file.logging.json);
    }

    #[test]
    fn test_missing_sip_table_is_rejected() {
        assert!(toml::from_str::<DeviceFile>("[logging]\nlevel = \"info\"\n").is_err());
    }
}
