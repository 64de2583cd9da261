//! Brspcom command line interface.

use std::{
    fs::File,
    io::{self, Read},
    process,
    sync::Arc,
    thread,
};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*,
    Arg, ArgMatches, SubCommand,
};
use console::style;
use hexplay::HexViewBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, log_enabled, trace, Level::Debug, LevelFilter};
use simplelog::*;

use brspcom::{
    adv::{self, Advertisement},
    Bridge, LoopbackPeripheral, SettingsBuilder, MAX_CHUNK,
};

fn main() {
    println!("[BR] brspcom v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Brspcom turns the BRSP serial bridge GATT service into a plain \
            byte stream: writes are cut into 20-byte chunks sent one at a \
            time, notifications are reassembled into a readable stream, and \
            transmission failures are reported when the stream is flushed.\n\
            \n\
            The `loopback` command pushes data through a bridge opened on an \
            in-process peripheral echoing everything back, and verifies what \
            comes out. The `adv` command decodes the advertising data of the \
            devices exposing the bridge.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .setting(SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help(
                    "Sets the logging level of verbosity, repeat several times for \
                     higher verbosity",
                ),
        )
        .subcommand(
            SubCommand::with_name("loopback")
                .about("push data through a bridge on a loopback peripheral")
                .arg(
                    Arg::with_name("CHUNK")
                        .help("payload bytes per physical write")
                        .short("-c")
                        .long("--chunk")
                        .takes_value(true)
                        .default_value("20")
                        .require_equals(true),
                )
                .arg(
                    Arg::with_name("NO_RESPONSE")
                        .help("write chunks without waiting for a response")
                        .long("--no-response"),
                )
                .arg(
                    Arg::with_name("SIZE")
                        .help("size of the generated data when no file is given")
                        .short("-s")
                        .long("--size")
                        .takes_value(true)
                        .default_value("4096")
                        .require_equals(true),
                )
                .arg(
                    Arg::with_name("FILE")
                        .help("file to push through the bridge")
                        .long_help(
                            "file to push through the bridge; when not set, \
                             `brspcom` generates a test pattern of `--size` bytes.",
                        )
                        .index(1),
                ),
        )
        .subcommand(
            SubCommand::with_name("adv")
                .about("decode advertising data")
                .arg(
                    Arg::with_name("HEX")
                        .help("raw advertising data as hex strings")
                        .required(true)
                        .multiple(true),
                ),
        )
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'brspcom -v -v -v' or 'brspcom -vvv' vs 'brspcom -v'
    let verbosity = match matches.subcommand() {
        (_, Some(sub)) => matches.occurrences_of("v") + sub.occurrences_of("v"),
        _ => matches.occurrences_of("v"),
    };
    let log_level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(log_level, Config::default(), TerminalMode::Mixed).unwrap();

    trace!("{:#?}", matches);

    let exit_code = match matches.subcommand() {
        ("loopback", Some(sub)) => loopback(sub),
        ("adv", Some(sub)) => decode_adv(sub),
        _ => unreachable!(),
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

// =============================================================================
// Loopback
// =============================================================================

fn loopback(matches: &ArgMatches) -> i32 {
    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let chunk = value_t!(matches.value_of("CHUNK"), usize).unwrap_or_else(|_| {
        invalid_value("chunk", matches.value_of("CHUNK").unwrap(), "a numeric value")
    });
    if chunk == 0 || chunk > MAX_CHUNK {
        invalid_value(
            "chunk",
            matches.value_of("CHUNK").unwrap(),
            &format!("a value between 1 and {}", MAX_CHUNK),
        );
    }
    let size = value_t!(matches.value_of("SIZE"), usize).unwrap_or_else(|_| {
        invalid_value("size", matches.value_of("SIZE").unwrap(), "a numeric value")
    });

    let data = match matches.value_of("FILE") {
        Some(path) => match read_file(path) {
            Ok(data) => data,
            Err(ref e) => {
                println!(
                    "{}",
                    style(format!("[BR] 🙁 could not read `{}`: {}", path, e)).red()
                );
                return 1;
            }
        },
        None => (0..size).map(|i| (i % 251) as u8).collect(),
    };

    let settings = SettingsBuilder::new()
        .max_chunk(chunk)
        .write_with_response(!matches.is_present("NO_RESPONSE"))
        .finalize();
    debug!("{:#?}", settings);

    let peripheral = Arc::new(LoopbackPeripheral::new());
    let bridge = match Bridge::open_with(peripheral.clone(), settings) {
        Ok(bridge) => Arc::new(bridge),
        Err(ref e) => {
            println!(
                "{}",
                style(format!("[BR] 💥 Failed to open the bridge: {}", e)).red()
            );
            return 1;
        }
    };
    info!("loopback bridge open, pushing {} bytes", data.len());

    // Read the echo on another thread while this one writes.
    let reader = {
        let bridge = bridge.clone();
        let expected = data.len();
        thread::spawn(move || -> Result<Vec<u8>, brspcom::BridgeError> {
            let pb = ProgressBar::new(expected as u64);
            pb.set_style(ProgressStyle::default_bar()
                .template("[BR] ⏩ Echo [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .progress_chars("=>-"));

            let mut echoed = Vec::with_capacity(expected);
            let mut buf = [0u8; 256];
            while echoed.len() < expected {
                let n = bridge.read(&mut buf)?;
                echoed.extend_from_slice(&buf[..n]);
                pb.set_position(echoed.len() as u64);
            }
            pb.finish_with_message("[BR] Echo received");
            Ok(echoed)
        })
    };

    let pushed = bridge.write(&data).and_then(|_| bridge.flush());
    if let Err(ref e) = pushed {
        println!(
            "{}",
            style(format!("[BR] 💥 Failed to push data: {}", e)).red()
        );
        let _ = bridge.close();
        return 1;
    }

    let echoed = match reader.join() {
        Ok(Ok(echoed)) => echoed,
        Ok(Err(ref e)) => {
            println!("{}", style(format!("[BR] 💥 Read failed: {}", e)).red());
            return 1;
        }
        Err(_) => {
            println!("{}", style("[BR] 💥 Reader thread panicked").red());
            return 1;
        }
    };
    let _ = bridge.close();

    // Dump the echoed data in a hex table for debugging
    if log_enabled!(Debug) {
        let view = HexViewBuilder::new(&echoed)
            .address_offset(0)
            .row_width(16)
            .finish();
        println!("{}", view);
    }

    if echoed != data {
        let at = echoed
            .iter()
            .zip(data.iter())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| echoed.len().min(data.len()));
        println!(
            "{}",
            style(format!("[BR] 💥 Echo differs at offset {}", at)).red()
        );
        return 1;
    }

    println!(
        "[BR] 👍 {} bytes echoed in {} chunks of up to {} bytes",
        style(data.len()).green(),
        style((data.len() + chunk - 1) / chunk).cyan(),
        chunk
    );
    debug!("loopback echoed {} bytes", peripheral.echoed());
    0
}

fn read_file(path: &str) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(data)
}

// =============================================================================
// Advertising data
// =============================================================================

fn decode_adv(matches: &ArgMatches) -> i32 {
    let mut exit_code = 0;
    for hex in matches.values_of("HEX").unwrap() {
        let raw = match parse_hex(hex) {
            Ok(raw) => raw,
            Err(ref e) => {
                println!(
                    "{}: `{}` is not a valid hex string ({})",
                    style("error").red(),
                    style(hex).on_red(),
                    e
                );
                exit_code = 1;
                continue;
            }
        };

        match adv::parse_ad_data(&raw) {
            Some(adv) => print_adv(&adv),
            None => {
                println!(
                    "{} {}",
                    style("[BR] ❔ not a serial bridge advertisement:").yellow(),
                    hex
                );
                exit_code = 1;
            }
        }
    }
    exit_code
}

fn print_adv(adv: &Advertisement) {
    let version = match adv {
        Advertisement::V1(_) => "v1",
        Advertisement::V2(_) => "v2",
    };
    let yes_no = |b: bool| if b { style("yes").green() } else { style("no").red() };

    println!(
        "[BR] 📡 {} device {}",
        style(version).cyan(),
        style(format!("{:08x}", adv.device_id())).bold()
    );
    println!("     auth key             : {:08x}", adv.auth_key());
    println!("     can transact         : {}", yes_no(adv.can_transact()));
    println!(
        "     supports maintenance : {}",
        yes_no(adv.supports_maintenance())
    );
    println!(
        "     needs maintenance    : {}",
        yes_no(adv.needs_maintenance())
    );
    if let Advertisement::V2(v2) = adv {
        println!("     firmware version     : {:04x}", v2.fw_version);
        if let Some(partner) = &v2.partner_data {
            println!("     partner data         : {}", hex::encode(partner));
        }
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != ':')
        .collect();
    hex::decode(digits)
}

fn invalid_value(name: &str, value: &str, expected: &str) -> ! {
    println!(
        "{}: `{}` needs to be {}",
        style("error").red(),
        style(name).cyan(),
        expected
    );
    println!(
        "   {} `{}` is not a valid value",
        style("-->").cyan(),
        style(value).on_red()
    );
    process::exit(-1);
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn hex_arguments_accept_separators() {
    assert_eq!(parse_hex("02 01:06").unwrap(), vec![0x02, 0x01, 0x06]);
    assert_eq!(parse_hex("0A0b").unwrap(), vec![0x0a, 0x0b]);
    assert!(parse_hex("0x12").is_err());
    assert!(parse_hex("123").is_err());
}
