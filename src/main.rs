use anyhow::{Context, Result, ensure};
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};

use vmx2kubevirt::{kubevirt, vmdk, vmx};

const DEFAULT_NAMESPACE: &str = "default";

/// Convert a VMware VMX file to a KubeVirt VirtualMachine YAML, or display
/// the descriptor of a VMDK.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Path to the VMX file (for VM conversion)
    #[arg(long, value_name = "PATH")]
    vmx: Option<PathBuf>,

    /// Name of the PVC holding the primary VMDK (for VM conversion)
    #[arg(long, value_name = "NAME")]
    pvc: Option<String>,

    /// Name of the VirtualMachine resource (defaults to the VMX displayName)
    #[arg(long)]
    name: Option<String>,

    /// Namespace of the VirtualMachine resource
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Start the VM immediately (spec.running=true)
    #[arg(long)]
    run: bool,

    /// Path to a VMDK file whose descriptor should be displayed. Takes
    /// precedence over conversion.
    #[arg(long, value_name = "PATH")]
    vmdk_info: Option<PathBuf>,

    /// Largest embedded VMDK descriptor accepted, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = vmdk::DEFAULT_MAX_DESCRIPTOR_SIZE)]
    max_descriptor_size: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Action<'a> {
    VmdkInfo(&'a Path),
    Convert { vmx: &'a Path, pvc: &'a str },
}

impl Cli {
    fn conversion_flags_set(&self) -> bool {
        self.vmx.is_some() || self.pvc.is_some() || self.optional_flags_set()
    }

    fn optional_flags_set(&self) -> bool {
        self.name.is_some() || self.namespace != DEFAULT_NAMESPACE || self.run
    }

    fn action(&self) -> std::result::Result<Action<'_>, &'static str> {
        if let Some(path) = &self.vmdk_info {
            return Ok(Action::VmdkInfo(path));
        }
        match (&self.vmx, &self.pvc) {
            (Some(vmx), Some(pvc)) => Ok(Action::Convert { vmx, pvc }),
            (Some(_), None) => Err("--pvc is required with --vmx for VM conversion"),
            (None, Some(_)) => Err("--vmx is required with --pvc for VM conversion"),
            (None, None) if self.optional_flags_set() => Err(
                "optional flags like --name, --namespace and --run require both --vmx and --pvc",
            ),
            (None, None) => Err("please specify an action with --vmdk-info or --vmx and --pvc"),
        }
    }
}

/// Logs go to stderr, filtered by RUST_LOG and defaulting to 'info'.
fn install_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {message}\n");
    eprintln!("{}", Cli::command().render_help());
    std::process::exit(1);
}

fn show_vmdk_info(cli: &Cli, path: &Path) -> Result<()> {
    if cli.conversion_flags_set() {
        tracing::warn!(
            "Other flags (--vmx, --pvc, --name, --namespace, --run) are ignored when --vmdk-info is specified"
        );
    }

    let options =
        vmdk::ExtractOptions::default().with_max_descriptor_size(cli.max_descriptor_size);
    let descriptor = match vmdk::extract_descriptor_with(path, &options) {
        Ok(descriptor) => descriptor,
        Err(e) if e.is_recognized() => {
            return Err(e).context("error extracting descriptor from VMDK file");
        }
        Err(e) => return Err(e).context("file is not a recognized VMDK or could not be read"),
    };
    tracing::debug!("Extracted {:?} descriptor", descriptor.format);

    println!(
        "--- VMDK Descriptor for: {} ---\n{}\n--- End Descriptor ---",
        path.display(),
        descriptor.text
    );
    Ok(())
}

fn convert(cli: &Cli, vmx_path: &Path, pvc: &str) -> Result<()> {
    let parsed = vmx::parse_vmx(vmx_path).context("error parsing VMX file")?;

    let vm = kubevirt::create_virtual_machine(
        &parsed.config,
        pvc,
        cli.name.as_deref(),
        &cli.namespace,
        cli.run,
    )
    .context("error creating KubeVirt VM object")?;
    let yaml = vm.to_yaml()?;

    let output = output_path(vmx_path, vm.name())?;
    tracing::info!("Writing KubeVirt VirtualMachine YAML to: {}", output.display());
    std::fs::write(&output, yaml).with_context(|| {
        format!(
            "error writing KubeVirt VM YAML to file {}",
            output.display()
        )
    })?;
    Ok(())
}

/// The YAML lands next to the VMX, named after the VM.
fn output_path(vmx_path: &Path, vm_name: &str) -> Result<PathBuf> {
    ensure!(
        !vm_name.contains(['/', '\\']) && vm_name != "." && vm_name != "..",
        "VM name '{vm_name}' cannot be used as an output file name"
    );
    Ok(vmx_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{vm_name}.yaml")))
}

fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match cli.action() {
        Ok(Action::VmdkInfo(path)) => show_vmdk_info(&cli, path),
        Ok(Action::Convert { vmx, pvc }) => convert(&cli, vmx, pvc),
        Err(message) => usage_error(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vmx2kubevirt").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn vmdk_info_takes_precedence() {
        let cli = parse(&["--vmdk-info", "disk.vmdk", "--vmx", "a.vmx", "--pvc", "p"]);
        assert_eq!(cli.action(), Ok(Action::VmdkInfo(Path::new("disk.vmdk"))));
        assert!(cli.conversion_flags_set());
    }

    #[test]
    fn convert_needs_both_vmx_and_pvc() {
        let cli = parse(&["--vmx", "a.vmx", "--pvc", "p"]);
        assert_eq!(
            cli.action(),
            Ok(Action::Convert {
                vmx: Path::new("a.vmx"),
                pvc: "p"
            })
        );
        assert!(parse(&["--vmx", "a.vmx"]).action().unwrap_err().contains("--pvc"));
        assert!(parse(&["--pvc", "p"]).action().unwrap_err().contains("--vmx"));
    }

    #[test]
    fn optional_flags_alone_are_rejected() {
        let err = parse(&["--run"]).action().unwrap_err();
        assert!(err.contains("optional flags"));
        let err = parse(&["--namespace", "vms"]).action().unwrap_err();
        assert!(err.contains("optional flags"));
        let err = parse(&[]).action().unwrap_err();
        assert!(err.contains("specify an action"));
    }

    #[test]
    fn default_namespace_is_not_an_optional_flag() {
        let cli = parse(&["--vmdk-info", "disk.vmdk", "--namespace", "default"]);
        assert!(!cli.conversion_flags_set());
    }

    #[test]
    fn output_is_written_next_to_vmx() {
        assert_eq!(
            output_path(Path::new("/vms/web/web.vmx"), "web").unwrap(),
            PathBuf::from("/vms/web/web.yaml")
        );
        assert_eq!(
            output_path(Path::new("web.vmx"), "web").unwrap(),
            PathBuf::from("web.yaml")
        );
    }

    #[test]
    fn names_escaping_the_vmx_directory_are_refused() {
        let vmx = Path::new("/vms/web/web.vmx");
        assert!(output_path(vmx, "../../x").is_err());
        assert!(output_path(vmx, "a/b").is_err());
        assert!(output_path(vmx, "..").is_err());
        assert!(output_path(vmx, "..\\x").is_err());
        assert!(output_path(vmx, "..web").is_ok());
    }
}
