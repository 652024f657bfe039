use anstyle::{AnsiColor, Color, Style};
use clap::Parser;
use clap::builder::Styles;
use std::path::PathBuf;

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))));

/// Execute a compiled Spade module on the Velocity VM.
#[derive(Debug, Parser)]
#[command(name = "velocity", version, about, styles = STYLES)]
pub struct Arguments {
    /// The compiled module file to execute
    pub module: PathBuf,

    /// Arguments passed to the entry method
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Colon-separated directories searched for imported modules
    #[arg(long, value_name = "PATH")]
    pub module_path: Option<String>,

    /// Directory searched for native libraries
    #[arg(long, value_name = "DIR")]
    pub library_path: Option<PathBuf>,

    /// Maximum call-stack depth per thread
    #[arg(long, default_value_t = 1024, value_name = "FRAMES")]
    pub stack_depth: usize,

    /// Member name of the entry point method
    #[arg(long, default_value = "main", value_name = "NAME")]
    pub entry_point: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let arguments = Arguments::parse_from(["velocity", "hello.elp"]);
        assert_eq!(PathBuf::from("hello.elp"), arguments.module);
        assert!(arguments.args.is_empty());
        assert_eq!(1024, arguments.stack_depth);
        assert_eq!("main", arguments.entry_point);
    }

    #[test]
    fn test_program_arguments() {
        let arguments =
            Arguments::parse_from(["velocity", "hello.elp", "first", "second"]);
        assert_eq!(vec!["first".to_string(), "second".to_string()], arguments.args);
    }

    #[test]
    fn test_options() {
        let arguments = Arguments::parse_from([
            "velocity",
            "--module-path",
            "lib:modules",
            "--stack-depth",
            "64",
            "--entry-point",
            "start",
            "hello.elp",
        ]);
        assert_eq!(Some("lib:modules".to_string()), arguments.module_path);
        assert_eq!(64, arguments.stack_depth);
        assert_eq!("start", arguments.entry_point);
    }
}
