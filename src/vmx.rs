//! VMX (VMware virtual machine configuration) parsing.
//!
//! A VMX file is a flat list of `key = "value"` lines. Only the handful of
//! keys needed to size a KubeVirt VM are read, everything else is ignored.

use anyhow::Context;
use std::path::Path;
use thiserror::Error;

const DEFAULT_NUM_VCPUS: u32 = 1;
const DEFAULT_MEMORY_MIB: i64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmxConfig {
    pub display_name: String,
    pub num_vcpus: u32,
    /// `memsize` is expressed in MiB.
    pub memory_mib: i64,
}

impl Default for VmxConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            num_vcpus: DEFAULT_NUM_VCPUS,
            memory_mib: DEFAULT_MEMORY_MIB,
        }
    }
}

/// Non-fatal problems found while parsing. Defaults are kept in their place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmxWarning {
    #[error("could not parse {key} value '{value}': {reason}")]
    InvalidNumber {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("'displayName' not found in VMX, using filename '{fallback}' as fallback")]
    MissingDisplayName { fallback: String },
}

#[derive(Debug, Clone)]
pub struct ParsedVmx {
    pub config: VmxConfig,
    pub warnings: Vec<VmxWarning>,
}

/// Reads and parses the VMX file at `path`. Warnings are logged as they are
/// found and also returned to the caller.
pub fn parse_vmx<P: AsRef<Path>>(path: P) -> anyhow::Result<ParsedVmx> {
    let path = path.as_ref();
    let content = std::fs::read(path)
        .with_context(|| format!("failed to read VMX file {}", path.display()))?;
    let content = String::from_utf8_lossy(&content);

    let parsed = parse_vmx_str(&content, path);
    for warning in &parsed.warnings {
        tracing::warn!("{}", warning);
    }
    Ok(parsed)
}

/// Parses VMX text. `path` is only used to derive a fallback display name.
pub fn parse_vmx_str(content: &str, path: &Path) -> ParsedVmx {
    let mut config = VmxConfig::default();
    let mut warnings = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());

        match key.trim().to_ascii_lowercase().as_str() {
            "displayname" => config.display_name = value.to_string(),
            "numvcpus" => match parse_unsigned(value) {
                Ok(cpus) => config.num_vcpus = cpus,
                Err(reason) => warnings.push(VmxWarning::InvalidNumber {
                    key: "numvcpus",
                    value: value.to_string(),
                    reason,
                }),
            },
            "memsize" => match value.parse::<i64>() {
                Ok(mem) => config.memory_mib = mem,
                Err(e) => warnings.push(VmxWarning::InvalidNumber {
                    key: "memsize",
                    value: value.to_string(),
                    reason: e.to_string(),
                }),
            },
            _ => {}
        }
    }

    if config.display_name.is_empty() {
        config.display_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        warnings.push(VmxWarning::MissingDisplayName {
            fallback: config.display_name.clone(),
        });
    }

    ParsedVmx { config, warnings }
}

/// Digits only; a leading `+` is not a valid count.
fn parse_unsigned(value: &str) -> Result<u32, String> {
    if value.starts_with('+') {
        return Err("unexpected sign".to_string());
    }
    value.parse::<u32>().map_err(|e| e.to_string())
}

/// Strips at most one double quote from each end.
fn unquote(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(content: &str) -> ParsedVmx {
        parse_vmx_str(content, Path::new("/vms/fallback-name.vmx"))
    }

    #[test]
    fn parses_known_keys() {
        let parsed = parse("displayName=myVM\nnumvcpus=4\nmemsize=8192");
        assert_eq!(
            parsed.config,
            VmxConfig {
                display_name: "myVM".to_string(),
                num_vcpus: 4,
                memory_mib: 8192,
            }
        );
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn typical_vmx_file() {
        let content = r#".encoding = "UTF-8"
config.version = "8"
virtualHW.version = "19"
# comment line
displayName = "Ubuntu Server 22.04"
guestOS = "ubuntu-64"
numvcpus = "2"
memsize = "4096"
scsi0:0.fileName = "Ubuntu Server 22.04.vmdk"
"#;
        let config = parse(content).config;
        assert_eq!(config.display_name, "Ubuntu Server 22.04");
        assert_eq!(config.num_vcpus, 2);
        assert_eq!(config.memory_mib, 4096);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let config = parse("DISPLAYNAME = \"a\"\r\nNumVCPUs = \"8\"\r\nMemSize = \"512\"\r\n").config;
        assert_eq!(config.display_name, "a");
        assert_eq!(config.num_vcpus, 8);
        assert_eq!(config.memory_mib, 512);
    }

    #[test]
    fn defaults_when_absent() {
        let parsed = parse("displayName = \"vm\"\nguestOS = \"other\"\n");
        assert_eq!(parsed.config.num_vcpus, 1);
        assert_eq!(parsed.config.memory_mib, 1024);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn invalid_number_keeps_default_and_warns() {
        let parsed = parse("displayName = \"vm\"\nnumvcpus = \"foo\"\nmemsize = \"lots\"\n");
        assert_eq!(parsed.config.num_vcpus, 1);
        assert_eq!(parsed.config.memory_mib, 1024);
        assert_eq!(parsed.warnings.len(), 2);
        assert!(matches!(
            &parsed.warnings[0],
            VmxWarning::InvalidNumber { key: "numvcpus", value, .. } if value == "foo"
        ));
        assert!(matches!(
            &parsed.warnings[1],
            VmxWarning::InvalidNumber { key: "memsize", .. }
        ));
    }

    #[test]
    fn negative_vcpus_are_rejected() {
        let parsed = parse("displayName = \"vm\"\nnumvcpus = \"-2\"\n");
        assert_eq!(parsed.config.num_vcpus, 1);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn signed_vcpu_count_is_rejected() {
        let parsed = parse("displayName = \"vm\"\nnumvcpus = \"+4\"\n");
        assert_eq!(parsed.config.num_vcpus, 1);
        assert!(matches!(
            &parsed.warnings[..],
            [VmxWarning::InvalidNumber { key: "numvcpus", value, .. }] if value == "+4"
        ));
    }

    #[test]
    fn missing_display_name_falls_back_to_file_stem() {
        let parsed = parse("numvcpus = \"2\"\n");
        assert_eq!(parsed.config.display_name, "fallback-name");
        assert_eq!(
            parsed.warnings,
            vec![VmxWarning::MissingDisplayName {
                fallback: "fallback-name".to_string()
            }]
        );
    }

    #[test]
    fn empty_display_name_falls_back_to_file_stem() {
        let parsed = parse("displayName = \"\"\n");
        assert_eq!(parsed.config.display_name, "fallback-name");
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn only_the_extension_is_stripped() {
        let parsed = parse_vmx_str("", Path::new("my.old.vm.vmx"));
        assert_eq!(parsed.config.display_name, "my.old.vm");
    }

    #[test]
    fn splits_on_first_equals_and_skips_junk() {
        let content = "garbage line without separator\n\
                       displayName = \"a=b\"\n\
                       # numvcpus = \"16\"\n\
                       \n";
        let parsed = parse(content);
        assert_eq!(parsed.config.display_name, "a=b");
        assert_eq!(parsed.config.num_vcpus, 1);
    }

    #[test]
    fn strips_only_one_layer_of_quotes() {
        assert_eq!(unquote("\"vm\""), "vm");
        assert_eq!(unquote("\"\"vm\"\""), "\"vm\"");
        assert_eq!(unquote("\"vm"), "vm");
        assert_eq!(unquote("vm"), "vm");
    }

    #[test]
    fn last_value_wins() {
        let config = parse("memsize = \"1\"\nmemsize = \"2\"\ndisplayName=x").config;
        assert_eq!(config.memory_mib, 2);
    }

    #[test]
    fn parse_vmx_reads_file() {
        let mut file = NamedTempFile::with_suffix(".vmx").unwrap();
        writeln!(file, "numvcpus = \"3\"").unwrap();
        file.flush().unwrap();

        let parsed = parse_vmx(file.path()).unwrap();
        assert_eq!(parsed.config.num_vcpus, 3);
        let stem = file.path().file_stem().unwrap().to_string_lossy();
        assert_eq!(parsed.config.display_name, stem);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn parse_vmx_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_vmx(dir.path().join("nope.vmx")).unwrap_err();
        assert!(err.to_string().contains("failed to read VMX file"));
    }
}
