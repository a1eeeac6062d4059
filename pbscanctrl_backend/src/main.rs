use std::path::Path;
use std::process;

use log::{error, info};

use pbcompiler_backend::*;
use pbscanctrl_backend::*;

/// Loads `config` (if given) onto every board and leaves them stopped.
fn run<B, T>(board: B, trigger: T, config: Option<&str>)
where
    B: PulseBoard + Send + 'static,
    T: TriggerSource + Send + 'static,
{
    let spec = BoardSpec::default();
    let options = DriverOptions {
        sequence_output: None,
        ..DriverOptions::default()
    };
    let driver = match ScanDriver::init(board, trigger, spec, options) {
        Ok(driver) => driver,
        Err(err) => {
            error!("Board initialization failed: {}", err);
            process::exit(-1);
        }
    };

    if let Some(path) = config {
        match load_config(Path::new(path), driver.board_count(), &spec) {
            Ok(config) => {
                if let Err(err) = driver.edit_program(|p| *p = config.program) {
                    error!("{}", err);
                }
            }
            Err(err) => {
                error!("{}", err);
                process::exit(-1);
            }
        }
    }

    let loaded = driver.load_boards(true);
    if let Err(err) = driver.close() {
        error!("{}", err);
    }
    match loaded {
        Ok(()) => info!("Program loaded to {} board(s)", driver.board_count()),
        Err(err) => {
            error!("{}", err);
            process::exit(-1);
        }
    }
}

fn main() {
    env_logger::init();
    let config = std::env::args().nth(1);

    #[cfg(feature = "hardware")]
    run(SpinCore::new(), DaqTrigger::new(), config.as_deref());

    #[cfg(not(feature = "hardware"))]
    run(MockBoard::new(1), MockTrigger::new(&[]), config.as_deref());
}
