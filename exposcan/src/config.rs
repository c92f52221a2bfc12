use std::path::Path;

use toml::{Table, Value};

use crate::classify::PrivilegeRule;
use crate::utils::{path_must_str, read_file};

/// Optional per-scan settings, read from `exposcan.toml` in the scan root
///
/// ```toml
/// privilege-rule = "protection-flags"
///
/// [axml]
/// command = "androguard axml"
/// ```
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub privilege_rule: Option<PrivilegeRule>,
    pub axml_command: Option<String>,
}

fn get_str<'t>(table: &'t Table, key: &str, path: &Path) -> crate::Result<Option<&'t str>> {
    match table.get(key) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) => Ok(Some(s)),
            None => Err(crate::Error::InvalidConfig(
                path_must_str(path).into(),
                format!("invalid value for key: {} (expected type: string)", key),
            )),
        },
    }
}

impl Config {
    pub const FILE_NAME: &'static str = "exposcan.toml";

    /// Load the config next to the scan root, falling back to defaults when
    /// there is none
    pub fn load(root: &Path) -> crate::Result<Self> {
        let path = root.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::parse(&path)
    }

    pub fn parse(path: &Path) -> crate::Result<Self> {
        let raw = read_file(path)?;

        let table: Table = match toml::from_str(&raw) {
            Ok(v) => v,
            Err(e) => return Err(crate::Error::new_cfg(path, &e)),
        };

        let privilege_rule = match get_str(&table, "privilege-rule", path)? {
            None => None,
            Some(v) => Some(
                v.parse::<PrivilegeRule>()
                    .map_err(|e| crate::Error::new_cfg(path, &e))?,
            ),
        };

        let axml_command = match table.get("axml") {
            None => None,
            Some(Value::Table(t)) => get_str(t, "command", path)?.map(String::from),
            Some(_) => {
                return Err(crate::Error::InvalidConfig(
                    path_must_str(path).into(),
                    "invalid value for key: axml (expected type: table)".into(),
                ))
            }
        };

        Ok(Self {
            privilege_rule,
            axml_command,
        })
    }

    /// The privilege rule to analyze with
    ///
    /// Declared permissions can be judged by their decoded protection flag
    /// bits or by their level names, and the two disagree on some inputs.
    /// When the config doesn't choose, this defaults to the flag decode and
    /// warns about the choice it made.
    pub fn privilege_rule(&self) -> PrivilegeRule {
        match self.privilege_rule {
            Some(rule) => rule,
            None => {
                log::warn!(
                    "privilege-rule not configured; judging protectionLevel values as hex \
                     flag words (protection-flags). Manifests decoded with readable level \
                     names need privilege-rule = \"protection-names\" instead, and the two \
                     rules can classify the same component differently."
                );
                PrivilegeRule::ProtectionFlags
            }
        }
    }
}
