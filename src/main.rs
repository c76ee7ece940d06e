use std::io::{self, IsTerminal, Read};

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "latex-render-rust",
    version,
    about = "Render LaTeX expressions to PNG (and cropped PDF)"
)]
struct Cli {
    /// Expression to render (reads stdin when omitted)
    expression: Option<String>,

    /// User whose preamble and dpi apply
    #[arg(short = 'u', long = "user", default_value_t = 0)]
    user: u64,

    /// Also write a cropped PDF
    #[arg(short = 'p', long = "pdf")]
    pdf: bool,

    /// Output path prefix (writes <prefix>.png and <prefix>.pdf)
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Store the user's rendering dpi (100-1000) and exit
    #[arg(long = "set-dpi")]
    set_dpi: Option<u32>,

    /// Validate and store the user's preamble from a file and exit
    #[arg(long = "set-preamble")]
    set_preamble: Option<String>,

    /// Show the user's preamble and exit
    #[arg(long = "show-preamble")]
    show_preamble: bool,

    /// Show the default preamble and exit
    #[arg(long = "show-default-preamble")]
    show_default_preamble: bool,

    /// Report where the typesetting engine and Ghostscript were found
    #[arg(long = "diagnose")]
    diagnose: bool,

    /// Serve HTTP on ADDR (settings [server] addr when no value is given)
    #[arg(long = "server", value_name = "ADDR", num_args = 0..=1, default_missing_value = "")]
    server: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

impl Cli {
    fn needs_input(&self) -> bool {
        !(self.set_dpi.is_some()
            || self.set_preamble.is_some()
            || self.show_preamble
            || self.show_default_preamble
            || self.diagnose
            || self.server.is_some())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    latex_render_rust::logging::init(cli.verbose)?;

    let input = match cli.expression.clone() {
        Some(expression) => Some(expression),
        None if cli.needs_input() && !io::stdin().is_terminal() => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Some(buffer)
        }
        None => None,
    };

    let output = latex_render_rust::run(
        latex_render_rust::Config {
            user: cli.user,
            pdf: cli.pdf,
            output: cli.output,
            set_dpi: cli.set_dpi,
            set_preamble: cli.set_preamble,
            show_preamble: cli.show_preamble,
            show_default_preamble: cli.show_default_preamble,
            diagnose: cli.diagnose,
            server: cli.server,
            settings_path: cli.read_settings,
        },
        input,
    )
    .await?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
