//! Flash command implementation.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use nrfdfu::{DfuConfig, DfuEvent, DfuTransport, NativePort, SerialConfig, UpdateMode};
use std::path::Path;
use std::time::Duration;

use crate::Cli;

/// One firmware component selected on the command line.
struct Image {
    mode: UpdateMode,
    data: Vec<u8>,
}

fn load_image(label: &str, path: Option<&Path>, mode: UpdateMode) -> Result<Option<Image>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read {label} image {}", path.display()))?;
    Ok(Some(Image { mode, data }))
}

/// Flash command implementation.
#[allow(clippy::cast_possible_truncation)] // firmware images are far below 4 GiB
pub(crate) fn cmd_flash(
    cli: &Cli,
    application: Option<&Path>,
    softdevice: Option<&Path>,
    bootloader: Option<&Path>,
    init_packet: Option<&Path>,
) -> Result<()> {
    // Components go on the wire in softdevice, bootloader, application order
    let softdevice = load_image("softdevice", softdevice, UpdateMode::SOFTDEVICE)?;
    let bootloader = load_image("bootloader", bootloader, UpdateMode::BOOTLOADER)?;
    let application = load_image("application", application, UpdateMode::APPLICATION)?;

    let images: Vec<&Image> = [&softdevice, &bootloader, &application]
        .into_iter()
        .flatten()
        .collect();
    if images.is_empty() {
        bail!("no firmware given: pass at least one of --application, --softdevice, --bootloader");
    }

    let init_packet = init_packet
        .map(|path| {
            std::fs::read(path)
                .with_context(|| format!("failed to read init packet {}", path.display()))
        })
        .transpose()?;

    let Some(port) = cli.port.clone() else {
        bail!("no serial port specified (use --port or NRFDFU_PORT)");
    };

    let mode = images
        .iter()
        .fold(UpdateMode::NONE, |mode, image| mode | image.mode);
    let sizes = [&softdevice, &bootloader, &application]
        .map(|image| image.as_ref().map_or(0, |i| i.data.len() as u32));
    let firmware: Vec<u8> = images
        .iter()
        .flat_map(|image| image.data.iter().copied())
        .collect();

    if !cli.quiet {
        eprintln!(
            "{} Flashing {} bytes to {} at {} baud",
            style("→").cyan(),
            firmware.len(),
            port,
            cli.baud
        );
    }

    let config = DfuConfig {
        serial: SerialConfig {
            port_name: port,
            baud_rate: cli.baud,
            flow_control: cli.flow_control,
            timeout: Duration::from_secs_f64(cli.timeout),
            touch_baud: cli.touch,
        },
        single_bank: cli.single_bank,
        ..DfuConfig::default()
    };

    let mut dfu = DfuTransport::<NativePort>::open(config).context("failed to open serial port")?;

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let bar = pb.clone();
    dfu.set_event_listener(move |event| match event {
        DfuEvent::Progress { percent, done, .. } => {
            bar.set_position(u64::from(*percent));
            if *done {
                bar.set_message("complete");
            }
        },
        DfuEvent::Timeout { message } => {
            bar.println(format!("timeout: {message}"));
        },
    });

    let result = run_transfer(&mut dfu, mode, sizes, init_packet.as_deref(), &firmware);

    if let Err(err) = dfu.close() {
        warn!("failed to close serial port: {err}");
    }

    result?;
    pb.finish_with_message("complete");

    if !cli.quiet {
        eprintln!("{} Device firmware updated", style("✓").green().bold());
    }

    Ok(())
}

fn run_transfer(
    dfu: &mut DfuTransport<NativePort>,
    mode: UpdateMode,
    sizes: [u32; 3],
    init_packet: Option<&[u8]>,
    firmware: &[u8],
) -> Result<()> {
    let [sd_size, bl_size, app_size] = sizes;

    dfu.send_start_dfu(mode, sd_size, bl_size, app_size)
        .context("start packet not accepted")?;

    if let Some(init) = init_packet {
        dfu.send_init_packet(init)
            .context("init packet not accepted")?;
    }

    dfu.send_firmware(firmware)
        .context("firmware transfer failed")?;
    dfu.send_validate_firmware()
        .context("firmware validation failed")?;
    dfu.send_activate_firmware()
        .context("firmware activation failed")?;

    Ok(())
}
