//! Conversion of VMware virtual machines to KubeVirt.
//!
//! [`vmx`] reads the VM configuration, [`kubevirt`] turns it into a
//! `VirtualMachine` resource, and the re-exported [`vmdk`] crate pulls the
//! descriptor out of a disk image.

pub mod kubevirt;
pub mod vmx;

pub use vmdk;
