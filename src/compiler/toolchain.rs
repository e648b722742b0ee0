//! External assembler and linker invocation.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{CompileError, DiagnosticLog, Result};

/// Programs used to turn `build.asm` into an executable.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub nasm: String,
    pub linker: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            nasm: "nasm".into(),
            linker: "gcc".into(),
        }
    }
}

impl Toolchain {
    /// Assembles `<build_dir>/build.asm` into `<build_dir>/build.obj`,
    /// returning the object path.
    ///
    /// # Errors
    ///
    /// Returns an error if the assembler cannot be started or fails. Each
    /// line it wrote to `stderr` is recorded as an error entry in `log`.
    pub fn assemble(&self, build_dir: &Path, log: &mut DiagnosticLog) -> Result<PathBuf> {
        let obj = build_dir.join("build.obj");

        log.info("Compiling to object file");

        let mut cmd = Command::new(&self.nasm);
        cmd.args(["-f", "win32"])
            .arg(build_dir.join("build.asm"))
            .arg("-o")
            .arg(&obj);

        run(&self.nasm, &mut cmd, log).inspect_err(|_| {
            log.error("Error in compilation to object file");
        })?;

        log.info("Object file compiled");

        Ok(obj)
    }

    /// Links `obj` into the executable `<build_dir>/<out>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the linker cannot be started or fails. Each line
    /// it wrote to `stderr` is recorded as an error entry in `log`.
    pub fn link(
        &self,
        obj: &Path,
        build_dir: &Path,
        out: &str,
        log: &mut DiagnosticLog,
    ) -> Result<PathBuf> {
        let exe = build_dir.join(out);

        log.info("Compiling to executable");

        let mut cmd = Command::new(&self.linker);
        cmd.args(["-Wall", "-Wextra", "-o"]).arg(&exe).arg(obj);

        run(&self.linker, &mut cmd, log).inspect_err(|_| {
            log.error("Error in compilation to executable");
        })?;

        log.info("Executable compiled");

        Ok(exe)
    }
}

fn run(tool: &str, cmd: &mut Command, log: &mut DiagnosticLog) -> Result<()> {
    log::debug!("running {cmd:?}");

    let output = cmd
        .output()
        .map_err(|err| CompileError::io(format!("failed to run '{tool}'"), err))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    for line in stderr.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        log.error(line);
    }

    Err(CompileError::Toolchain {
        tool: tool.to_string(),
        stderr,
    })
}
