#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::BTreeMap;

use abstutil::Timer;
use anyhow::Result;
use geom::{Duration, Time};
use structopt::StructOpt;

use model::{trace_to_geojson, Model, Playback, PlaybackState};

#[derive(StructOpt)]
#[structopt(name = "replay", about = "Replay recorded GPS routes without a map on screen")]
struct Args {
    /// The path to a previously built and serialized model
    #[structopt(long)]
    model: Option<String>,
    /// The path to a .zip file with raw data to import
    #[structopt(long)]
    import_zip: Option<String>,
    /// The path to a CSV file of GPS fixes to import
    #[structopt(long)]
    log: Option<String>,
    /// The path to a JSON device registry, merged into --log imports
    #[structopt(long)]
    devices: Option<String>,
    /// Save the imported model in binary form for faster loading next time
    #[structopt(long)]
    save_model: Option<String>,
    /// Which device to replay. Defaults to the first one.
    #[structopt(long)]
    device: Option<String>,
    /// How long the whole route should take, in seconds
    #[structopt(long, default_value = "30")]
    duration: usize,
    /// Frames per second of the synthetic clock driving the replay
    #[structopt(long, default_value = "60")]
    fps: usize,
    /// Where to write the GeoJSON replay trace
    #[structopt(long, default_value = "replay.geojson")]
    out: String,
    /// Also write just the device's route, with start/end markers, as GeoJSON
    #[structopt(long)]
    export_route: Option<String>,
}

impl Args {
    // TODO These args only make sense on native, because they read files
    fn load(&mut self, timer: &mut Timer) -> Result<Model> {
        if let Some(path) = self.model.take() {
            if self.import_zip.is_some() || self.log.is_some() {
                bail!("You can't specify --model along with --import-zip or --log");
            }
            let bytes = fs_err::read(path)?;
            let decoded = base64::decode(bytes)?;
            return abstutil::from_binary::<Model>(&decoded);
        }

        let model = if let Some(path) = self.import_zip.take() {
            if self.log.is_some() {
                bail!("You can't specify both --import-zip and --log");
            }
            let bytes = fs_err::read(path)?;
            Model::import_zip_bytes(bytes, timer)?
        } else if let Some(path) = self.log.take() {
            let registry = match self.devices.take() {
                Some(path) => model::load_registry(fs_err::File::open(path)?)?,
                None => BTreeMap::new(),
            };
            Model::import_log(fs_err::File::open(path)?, registry)?
        } else {
            bail!("Specify --model, --import-zip, or --log");
        };

        if let Some(path) = self.save_model.take() {
            let encoded = base64::encode(abstutil::to_binary(&model));
            fs_err::write(path, encoded)?;
            info!("Saved the model for next time");
        }
        Ok(model)
    }
}

fn main() -> Result<()> {
    abstutil::logger::setup();

    let mut args = Args::from_iter(abstutil::cli_args());
    // The tracker UI's duration slider covers the same range
    if args.duration < 5 || args.duration > 60 {
        bail!("--duration must be between 5 and 60 seconds");
    }
    if args.fps == 0 {
        bail!("--fps must be positive");
    }

    let model = {
        let mut timer = Timer::new("load tracker data");
        args.load(&mut timer)?
    };

    if model.devices.is_empty() {
        bail!("The model has no devices with enough fixes to replay");
    }
    for device in &model.devices {
        info!("{}", device.describe());
    }

    let device = match &args.device {
        Some(name) => {
            let name = name.as_str();
            model
                .devices
                .iter()
                .find(|d| d.name() == name || d.original_id.as_str() == name)
                .ok_or_else(|| anyhow!("No device named {}", name))?
        }
        None => &model.devices[0],
    };
    info!("Replaying {}", device.name());

    if let Some(path) = &args.export_route {
        device.export_to_geojson(path.clone(), &model.gps_bounds)?;
        info!("Wrote {}", path);
    }

    let mut playback = Playback::new(Duration::seconds(args.duration as f64))?;
    playback.set_route(device.route.points().clone())?;
    playback.play();

    // The frame clock is synthetic, so the replay runs as fast as the loop does and the output
    // doesn't depend on the machine's actual refresh rate.
    let step = Duration::seconds(1.0 / (args.fps as f64));
    let mut now = Time::START_OF_DAY;
    let mut samples = Vec::new();
    let mut next_report = 10;
    loop {
        let frame = match playback.tick(now) {
            Some(frame) => frame,
            None => break,
        };
        if frame.progress_percent >= next_report {
            info!("{}% of the way, at {}", frame.progress_percent, frame.pos);
            next_report += 10;
        }
        let done = frame.state != PlaybackState::Running;
        samples.push((now - Time::START_OF_DAY, frame));
        if done {
            break;
        }
        now = now + step;
    }

    let gj = trace_to_geojson(&device.route, &samples, &model.gps_bounds);
    fs_err::write(&args.out, serde_json::to_string_pretty(&gj)?)?;
    info!("Wrote {} samples to {}", samples.len(), args.out);
    Ok(())
}
