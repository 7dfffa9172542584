//! Command-line interface for the engraver driver.

use std::env;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use graver::{discover_ports, Graver, GraverResult};

fn usage() {
    print!(
        "Usage:
    graver list [--json]
    graver <com> <command>

Arguments:
    com        COM address, eg: /dev/ttyUSB0 on Unix, COM45 on Windows
    command    one of the commands described below

Commands:
    engrave    engrave an image
    reset      reset the engraver to default settings
    list       list candidate serial ports

Use \"graver <com> <command> --help\" for more information about a specific command.
"
    );
}

fn usage_engrave() {
    print!(
        "Usage:
    graver <com> engrave <image> [<options>]

Arguments:
    com        COM address, eg: /dev/ttyUSB0 on Unix, COM45 on Windows
    image      path to the image file

Options:
        --burn int   Burn time in ms (default 18)
        --times int  Amount of passes (default 1)
        --power int  Laser power in percentage [1, 100] (default 60)
    -v, --verbose    Increase the verbosity
        --debug      Include all the traces in the logs
        --help       Display this help message
"
    );
}

fn usage_reset() {
    print!(
        "Usage:
    graver <com> reset

Arguments:
    com        COM address, eg: /dev/ttyUSB0 on Unix, COM45 on Windows

Options:
    -v, --verbose    Increase the verbosity
        --debug      Include all the traces in the logs
        --help       Display this help message
"
    );
}

/// Verbosity flags shared by every command.
#[derive(Clone, Copy)]
enum Verbosity {
    Info,
    Verbose,
    Debug,
}

impl Verbosity {
    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Info => "graver=info",
            Verbosity::Verbose => "graver=debug",
            Verbosity::Debug => "graver=trace",
        }
    }
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        None => {
            usage();
            ExitCode::SUCCESS
        }
        Some("list") => {
            let json = args.iter().any(|a| a == "--json");
            list_ports(json)
        }
        Some(com) => {
            let com = com.to_string();
            match args.get(1).map(String::as_str) {
                Some("engrave") => engrave(&com, &args[2..]).await,
                Some("reset") => reset(&com, &args[2..]).await,
                Some(other) => {
                    eprintln!("Unknown command {}", other);
                    usage();
                    ExitCode::FAILURE
                }
                None => {
                    usage();
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn list_ports(json: bool) -> ExitCode {
    init_logging(Verbosity::Info);
    let ports = discover_ports();

    if json {
        match serde_json::to_string_pretty(&ports) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    if ports.is_empty() {
        println!("No serial ports found");
        return ExitCode::SUCCESS;
    }

    for port in ports {
        let label = port
            .product
            .or(port.manufacturer)
            .unwrap_or_else(|| "Serial Port".to_string());
        println!("{}    {}", port.port, label);
    }
    ExitCode::SUCCESS
}

/// Options accepted by the engrave command.
struct EngraveOptions {
    image: String,
    burn: u8,
    power: u8,
    times: u32,
    verbosity: Verbosity,
}

fn parse_engrave_options(args: &[String]) -> Result<Option<EngraveOptions>, String> {
    let mut image = None;
    let mut burn: u8 = 18;
    let mut power: u8 = 60;
    let mut times: u32 = 1;
    let mut verbosity = Verbosity::Info;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" => return Ok(None),
            "-v" | "--verbose" => verbosity = Verbosity::Verbose,
            "--debug" => verbosity = Verbosity::Debug,
            "--burn" => {
                let value = iter.next().ok_or("--burn requires a value")?;
                burn = value.parse().map_err(|_| format!("invalid burn time: {}", value))?;
            }
            "--power" => {
                let value = iter.next().ok_or("--power requires a value")?;
                power = value
                    .parse()
                    .map_err(|_| format!("invalid laser power: {}", value))?;
            }
            "--times" => {
                let value = iter.next().ok_or("--times requires a value")?;
                times = value
                    .parse()
                    .map_err(|_| format!("invalid amount of passes: {}", value))?;
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
            positional => {
                if image.replace(positional.to_string()).is_some() {
                    return Err("too many arguments".to_string());
                }
            }
        }
    }

    let image = image.ok_or("missing path to the image file")?;
    Ok(Some(EngraveOptions {
        image,
        burn,
        power,
        times,
        verbosity,
    }))
}

async fn engrave(com: &str, args: &[String]) -> ExitCode {
    let options = match parse_engrave_options(args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            usage_engrave();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}", e);
            usage_engrave();
            return ExitCode::FAILURE;
        }
    };

    init_logging(options.verbosity);

    let image = match image::open(&options.image) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_engrave(com, &image, &options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_engrave(
    com: &str,
    image: &image::DynamicImage,
    options: &EngraveOptions,
) -> GraverResult<()> {
    let mut graver = Graver::connect(com).await?;
    graver.set_burn_time(options.burn).await?;
    graver.set_laser_power(options.power).await?;
    graver.engrave(image, options.times).await?;
    Ok(())
}

async fn reset(com: &str, args: &[String]) -> ExitCode {
    let mut verbosity = Verbosity::Info;
    for arg in args {
        match arg.as_str() {
            "--help" => {
                usage_reset();
                return ExitCode::SUCCESS;
            }
            "-v" | "--verbose" => verbosity = Verbosity::Verbose,
            "--debug" => verbosity = Verbosity::Debug,
            other => {
                eprintln!("unknown option {}", other);
                usage_reset();
                return ExitCode::FAILURE;
            }
        }
    }

    init_logging(verbosity);

    match Graver::connect(com).await {
        Ok(mut graver) => {
            graver.reset();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
