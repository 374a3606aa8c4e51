//! Extension trait over [`std::process::Command`] that turns a non-zero
//! exit or a failed spawn into an [`anyhow::Error`] carrying the rendered
//! command line and captured output.

use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Output},
};

use anyhow::{anyhow, bail, Context, Error};
use log::trace;

mod sealed {
    pub trait Sealed {}
    impl Sealed for std::process::Output {}
    impl Sealed for std::process::ExitStatus {}
    impl Sealed for std::process::Command {}
    impl Sealed for Result<std::process::Output, std::io::Error> {}
}

pub trait OutputChecker: sealed::Sealed {
    fn is_success(&self) -> bool;
    fn exit_code(&self) -> Option<i32>;
    fn end_signal(&self) -> Option<i32>;

    fn output(&self) -> String {
        String::new()
    }

    fn error_output(&self) -> String {
        String::new()
    }

    fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();
        let mut report = String::new();
        if !stdout.is_empty() {
            report += &format!("stdout:\n{stdout}\n");
        }
        if !stderr.is_empty() {
            report += &format!("stderr:\n{stderr}\n");
        }
        report
    }

    fn explain_exit(&self) -> String {
        if let Some(code) = self.exit_code() {
            format!("process exited with status: {code}")
        } else if let Some(signal) = self.end_signal() {
            format!("process was terminated by signal: {signal}")
        } else {
            "process exited with unknown status".to_string()
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }
        let report = self.output_report();
        if report.is_empty() {
            Err(anyhow!("(no output captured)").context(self.explain_exit()))
        } else {
            Err(anyhow!("process output:\n{report}").context(self.explain_exit()))
        }
    }
}

impl OutputChecker for Output {
    fn is_success(&self) -> bool {
        self.status.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.status.signal()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl OutputChecker for Result<Output, std::io::Error> {
    fn is_success(&self) -> bool {
        self.as_ref().map(Output::is_success).unwrap_or(false)
    }

    fn exit_code(&self) -> Option<i32> {
        self.as_ref().ok().and_then(Output::exit_code)
    }

    fn end_signal(&self) -> Option<i32> {
        self.as_ref().ok().and_then(Output::end_signal)
    }

    fn output(&self) -> String {
        self.as_ref().map(Output::output).unwrap_or_default()
    }

    fn error_output(&self) -> String {
        self.as_ref().map(Output::error_output).unwrap_or_default()
    }

    fn check(&self) -> Result<(), Error> {
        match self {
            Ok(output) => output.check(),
            Err(e) => bail!("failed to execute process: {e}"),
        }
    }
}

pub trait RunAndCheck: sealed::Sealed {
    fn run_and_check(&mut self) -> Result<(), Error>;
    fn output_and_check(&mut self) -> Result<String, Error>;
    fn raw_output_and_check(&mut self) -> Result<Output, Error>;
    fn render_command(&self) -> String;
}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        let rendered = self.render_command();
        trace!("executing '{rendered}'");
        let result = self.output();
        result
            .check()
            .with_context(|| format!("error running: {rendered}"))
    }

    fn output_and_check(&mut self) -> Result<String, Error> {
        let rendered = self.render_command();
        trace!("executing '{rendered}'");
        let result = self.output();
        result
            .check()
            .with_context(|| format!("error running: {rendered}"))?;
        Ok(result.output())
    }

    fn raw_output_and_check(&mut self) -> Result<Output, Error> {
        let rendered = self.render_command();
        trace!("executing '{rendered}'");
        let result = self.output();
        result
            .check()
            .with_context(|| format!("error running: {rendered}"))?;
        Ok(result.unwrap())
    }

    fn render_command(&self) -> String {
        if self.get_args().count() == 0 {
            return self.get_program().to_string_lossy().into_owned();
        }
        format!(
            "{} {}",
            self.get_program().to_string_lossy(),
            self.get_args()
                .map(|a| a.to_string_lossy())
                .map(|a| if a.contains(' ') {
                    format!("'{a}'")
                } else {
                    a.into_owned()
                })
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}
