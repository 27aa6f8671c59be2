use std::process::ExitCode;

fn main() -> ExitCode {
    match tile_seam::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
