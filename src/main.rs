//! Charger utility CLI.
//!
//! The emulator proper is library API behind the BLE layer; this binary
//! talks straight to the charger for bring-up and debugging: dump status,
//! options and presets, send the one-shot commands, and sanity-check the
//! YAML configuration files.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use bumpemu::charger::{ChargerLink, Powerlab};
use bumpemu::controller::constants::ChargerOperation;
use bumpemu::controller::messages::Battery;

#[derive(Parser)]
#[command(
    name = "bumpemu",
    about = "Powerlab charger utilities for the bump emulator."
)]
struct Args {
    /// Serial port (default: auto search for the charger's FTDI bridge).
    #[arg(short, long)]
    port: Option<String>,

    /// List serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Check the connection to the powerlab and exit.
    #[arg(short, long)]
    check: bool,

    /// Validate a battery configuration YAML file and exit.
    #[arg(short, long, value_name = "YML")]
    battery: Option<PathBuf>,

    /// Read the presets from the powerlab and show the ones the given
    /// presets configuration maps.
    #[arg(long)]
    show_presets: bool,

    /// The presets configuration YAML file.
    #[arg(long, value_name = "YML", default_value = "/etc/bumpemu/presets.yml")]
    presets_config: PathBuf,

    /// Get status.
    #[arg(short, long)]
    status: bool,

    /// Get options.
    #[arg(short, long)]
    options: bool,

    /// Get presets.
    #[arg(long)]
    presets: bool,

    /// Add a write to the read (presets or options).
    #[arg(short, long)]
    write: bool,

    /// Send the monitor command.
    #[arg(short, long)]
    monitor: bool,

    /// Send the enter command.
    #[arg(short, long)]
    enter: bool,

    /// Send the charge command.
    #[arg(long)]
    charge: bool,

    /// Send the discharge command.
    #[arg(long)]
    discharge: bool,

    /// Send the cycle command.
    #[arg(long)]
    cycle: bool,

    /// Set the active preset.
    #[arg(long, value_name = "NUM")]
    set_preset: Option<u8>,

    /// Number of parallel packs for commands.
    #[arg(long, default_value_t = 1)]
    num_parallel: u8,

    /// Use the node terminals instead of the rear banana plugs.
    #[arg(long)]
    no_bananas: bool,

    /// Log level when RUST_LOG is not set.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// The operation-to-preset mapping file: every operation name mapped to a
/// 1-based preset number.
fn load_preset_map(path: &PathBuf) -> Result<BTreeMap<ChargerOperation, usize>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let raw: BTreeMap<String, i64> =
        serde_yaml::from_reader(file).with_context(|| format!("parsing {}", path.display()))?;

    let required = [
        "accurate",
        "normal",
        "fastest",
        "storage",
        "discharge",
        "analyze",
        "monitor",
    ];
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !raw.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        bail!(
            "the following are missing from the presets config file: {}",
            missing.join(", ")
        );
    }

    let mut map = BTreeMap::new();
    for (key, val) in raw {
        let operation = ChargerOperation::from_name(&key)?;
        if val <= 0 {
            bail!("{val} is an invalid positive int value");
        }
        map.insert(operation, (val - 1) as usize);
    }
    Ok(map)
}

fn check_charger(port: Option<String>) -> Result<()> {
    let mut charger = Powerlab::new(port);
    println!("Reading options...");
    let options = charger.connect()?;
    println!("Reading status...");
    let status = charger.read_status()?;
    println!("Reading presets (slow)...");
    let presets = charger.read_presets(0)?;
    let used = presets.iter().filter(|preset| !preset.is_empty()).count();
    println!("{}", options.greeting_line1().trim());
    println!("Firmware: v{:.2}", status.firmware_version() as f64 / 100.0);
    println!("Presets: {used}");
    Ok(())
}

fn show_presets(args: &Args) -> Result<()> {
    let map = load_preset_map(&args.presets_config)?;
    let mut charger = Powerlab::new(args.port.clone());
    charger.connect()?;
    println!("Reading presets (slow)...");
    let presets = charger.read_presets(0)?;
    for (operation, preset_num) in map {
        let preset = &presets[preset_num];
        println!("{}", "-".repeat(40));
        println!("{operation:?}");
        println!("{}", "-".repeat(40));
        println!("  name: {}", preset.name().trim());
        println!("  preset_num: {}", preset.preset_num());
        println!("  chemistry: {}", preset.chemistry().unwrap_or("unknown"));
        println!("  charge_mamps: {}", preset.charge_mamps());
        println!("  max_charge_amps: {}", preset.max_charge_amps());
        println!("  charge_volts: {}", preset.charge_volts());
        println!("  discharge_mamps: {}", preset.discharge_mamps());
        println!("  discharge_volts: {}", preset.discharge_volts());
        println!("  num_parallel: {}", preset.num_parallel());
        println!("  num_cycles: {}", preset.num_cycles());
    }
    Ok(())
}

fn run_commands(args: &Args) -> Result<()> {
    let mut charger = Powerlab::new(args.port.clone());
    charger.connect()?;
    let use_bananas = !args.no_bananas;

    if args.presets {
        let mut presets = charger.read_presets(0)?;
        for preset in &presets {
            println!("---------------------------");
            println!(
                "Preset {} (cksum: {}): {}",
                preset.preset_num(),
                preset.calc_checksum(),
                preset.name()
            );
            println!("---------------------------");
            println!("{preset}");
        }
        if args.write {
            charger.write_presets(&mut presets, 0)?;
        }
    }

    if args.status {
        let status = charger.read_status()?;
        println!("{status}");
        if status.error_code() != 0 {
            bail!("charger reports error code {}", status.error_code());
        }
    }

    if args.options {
        let mut options = charger.read_options(0)?;
        println!("{options}");
        if args.write {
            charger.write_options(&mut options, 0)?;
        }
    }

    if args.monitor {
        charger.command_monitor(args.num_parallel, use_bananas, 0)?;
    }
    if args.enter {
        charger.command_enter(0)?;
    }
    if args.charge {
        charger.command_charge(args.num_parallel, use_bananas, 0)?;
    }
    if args.discharge {
        charger.command_discharge(args.num_parallel, use_bananas, 0)?;
    }
    if args.cycle {
        charger.command_cycle(args.num_parallel, use_bananas, 0)?;
    }
    if let Some(which) = args.set_preset {
        charger.set_active_preset(which, 0)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.as_str()),
    )
    .init();

    if args.list_ports {
        for port in serialport::available_ports()? {
            println!("{} ({:?})", port.port_name, port.port_type);
        }
        return Ok(());
    }

    if let Some(path) = &args.battery {
        let battery = Battery::from_yaml(path)?;
        println!(
            "battery ok: {} {:?} {}S {}mAh x{}",
            battery.brand_name,
            battery.chemistry,
            battery.cell_count,
            battery.capacity,
            battery.pack_count
        );
        return Ok(());
    }

    if args.check {
        return check_charger(args.port.clone());
    }

    if args.show_presets {
        return show_presets(&args);
    }

    run_commands(&args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn preset_map_requires_every_operation() {
        let mut file = tempfile_path("presets-missing");
        writeln!(file.1, "normal: 4").unwrap();
        let err = load_preset_map(&file.0).unwrap_err();
        assert!(err.to_string().contains("missing"));
        std::fs::remove_file(&file.0).unwrap();
    }

    #[test]
    fn preset_map_converts_to_zero_based() {
        let mut file = tempfile_path("presets-full");
        writeln!(
            file.1,
            "accurate: 2\nnormal: 4\nfastest: 3\nstorage: 5\ndischarge: 6\nanalyze: 7\nmonitor: 8"
        )
        .unwrap();
        let map = load_preset_map(&file.0).unwrap();
        assert_eq!(map[&ChargerOperation::Normal], 3);
        assert_eq!(map[&ChargerOperation::Accurate], 1);
        assert_eq!(map[&ChargerOperation::Monitor], 7);
        std::fs::remove_file(&file.0).unwrap();
    }

    fn tempfile_path(tag: &str) -> (PathBuf, File) {
        let mut path = std::env::temp_dir();
        path.push(format!("bumpemu-test-{tag}-{}.yml", std::process::id()));
        let file = File::create(&path).unwrap();
        (path, file)
    }
}
