use clap::{command, Parser};

// Some defaults; some of which can be overriden via CLI args
const SETTINGS_FILE_PATH: &str = "./settings.json";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Where to load and save the settings file
    #[arg(long="settingsPath",default_value_t=String::from(SETTINGS_FILE_PATH))]
    pub settings_path: String,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,

    /// How many simulated touches each mock scanner produces
    #[arg(long = "mock.touches", default_value_t = 2)]
    pub mock_touches: usize,

    /// Stop cleanly after this many seconds; 0 runs until killed
    #[arg(long = "runSeconds", default_value_t = 0)]
    pub run_seconds: u64,
}
