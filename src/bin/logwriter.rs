//! Demo host executable: registers itself as the `logwriter` service, whose
//! work routine appends a line to a temp file once a second.

#[cfg(windows)]
mod app {
    use clap::Parser;
    use std::ffi::OsStr;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::{thread, time::Duration};
    use winservice::WinService;

    const SERVICE_NAME: &str = "logwriter";
    const OUTPUT_PATH: &str = r"C:\Windows\Temp\logwriter.log";

    #[derive(clap::Parser)]
    #[clap(author, version, about = "Host the logwriter demo service")]
    struct Cli {
        #[clap(
            short = 'o',
            long = "op",
            value_enum,
            help = "Lifecycle operation to run against the registered service; \
                    omit to run the work routine in the foreground"
        )]
        op: Option<Operation>,
    }

    #[derive(clap::ValueEnum, Clone, Copy)]
    enum Operation {
        Install,
        Uninstall,
        Start,
        Stop,
        Status,
    }

    fn work() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(OUTPUT_PATH);
        let mut file = match file {
            Ok(file) => file,
            Err(err) => {
                log::error!("failed to open {OUTPUT_PATH}: {err}");
                return;
            }
        };
        loop {
            thread::sleep(Duration::from_secs(1));
            let _ = writeln!(file, "logwriter tick");
        }
    }

    pub fn main() -> anyhow::Result<()> {
        env_logger::init();
        let cli = Cli::parse();
        let service = WinService::new(SERVICE_NAME, work);

        if winservice::is_windows_service() {
            service.run()?;
            return Ok(());
        }

        match cli.op {
            Some(Operation::Install) => report(service.install::<&OsStr>(&[])),
            Some(Operation::Uninstall) => report(service.uninstall()),
            Some(Operation::Start) => report(service.start()),
            Some(Operation::Stop) => report(service.stop()),
            Some(Operation::Status) => match service.status() {
                Ok(state) => println!("{state:?}"),
                Err(err) => println!("{err}"),
            },
            None => service.run_foreground(),
        }
        Ok(())
    }

    fn report(result: winservice::Result<()>) {
        match result {
            Ok(()) => println!("ok"),
            Err(err) => println!("{err}"),
        }
    }
}

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    app::main()
}

#[cfg(not(windows))]
fn main() {
    eprintln!("logwriter only runs on Windows");
    std::process::exit(1);
}
