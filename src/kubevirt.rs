//! KubeVirt `VirtualMachine` resources built from a parsed VMX.
//!
//! Only the subset of the `kubevirt.io/v1` schema that the conversion
//! fills in is modelled here.

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::vmx::VmxConfig;

pub const API_VERSION: &str = "kubevirt.io/v1";
pub const KIND: &str = "VirtualMachine";
/// Label KubeVirt uses to tie a VMI back to its VM.
pub const APP_LABEL: &str = "kubevirt.io";
/// Kubernetes object names are limited to 63 characters.
pub const MAX_NAME_LEN: usize = 63;

const DISK_NAME: &str = "disk0";
const NETWORK_NAME: &str = "default";
const DISK_BUS: &str = "virtio";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineSpec {
    pub running: bool,
    pub template: VirtualMachineInstanceTemplateSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineInstanceTemplateSpec {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineInstanceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineInstanceSpec {
    pub domain: DomainSpec,
    pub networks: Vec<Network>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub cpu: Cpu,
    pub memory: Memory,
    pub devices: Devices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    /// Kubernetes quantity, e.g. `4096Mi`.
    pub guest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devices {
    pub disks: Vec<Disk>,
    pub interfaces: Vec<Interface>,
    pub rng: Rng,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub boot_order: u32,
    pub disk: DiskTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub masquerade: InterfaceMasquerade,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMasquerade {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rng {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub pod: PodNetwork,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodNetwork {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub persistent_volume_claim: PersistentVolumeClaimVolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimVolumeSource {
    pub claim_name: String,
}

impl VirtualMachine {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(self).context("failed to serialize VirtualMachine to YAML")
    }
}

/// Lowercases `name`, maps spaces and underscores to `-` and truncates the
/// result to [`MAX_NAME_LEN`] characters.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .take(MAX_NAME_LEN)
        .collect()
}

/// Builds a VM whose single boot disk is backed by the PVC `pvc_name`.
///
/// The resource name is `name_override` when given, otherwise the VMX display
/// name, and is sanitized either way.
pub fn create_virtual_machine(
    config: &VmxConfig,
    pvc_name: &str,
    name_override: Option<&str>,
    namespace: &str,
    running: bool,
) -> anyhow::Result<VirtualMachine> {
    ensure!(!pvc_name.trim().is_empty(), "PVC name must not be empty");

    let raw_name = name_override
        .filter(|name| !name.is_empty())
        .unwrap_or(config.display_name.as_str());
    let name = sanitize_name(raw_name);
    ensure!(
        !name.is_empty(),
        "derived VM name is empty, provide one with --name or set a usable displayName in the VMX"
    );

    Ok(VirtualMachine {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: BTreeMap::new(),
        },
        spec: VirtualMachineSpec {
            running,
            template: VirtualMachineInstanceTemplateSpec {
                metadata: ObjectMeta {
                    labels: BTreeMap::from([(APP_LABEL.to_string(), name)]),
                    ..Default::default()
                },
                spec: VirtualMachineInstanceSpec {
                    domain: DomainSpec {
                        cpu: Cpu {
                            cores: config.num_vcpus,
                        },
                        memory: Memory {
                            guest: format!("{}Mi", config.memory_mib),
                        },
                        devices: Devices {
                            disks: vec![Disk {
                                name: DISK_NAME.to_string(),
                                boot_order: 1,
                                disk: DiskTarget {
                                    bus: DISK_BUS.to_string(),
                                },
                            }],
                            interfaces: vec![Interface {
                                name: NETWORK_NAME.to_string(),
                                masquerade: InterfaceMasquerade::default(),
                            }],
                            rng: Rng::default(),
                        },
                    },
                    networks: vec![Network {
                        name: NETWORK_NAME.to_string(),
                        pod: PodNetwork::default(),
                    }],
                    volumes: vec![Volume {
                        name: DISK_NAME.to_string(),
                        persistent_volume_claim: PersistentVolumeClaimVolumeSource {
                            claim_name: pvc_name.to_string(),
                        },
                    }],
                },
            },
        },
    })
}
