// native.rs — Native backend: toolchain driver and compiled kernels
//
// Compiles generated C++ with the host toolchain into a standalone kernel
// executable, caches it on disk by content hash, and runs it once per
// execution, exchanging values as hex-encoded IEEE-754 bit patterns so that
// results cross the process boundary unchanged.
//
// Preconditions: `NativeSource` produced by `codegen::generate`.
// Postconditions: a kernel is built at most once per code object; later
//                 executions reuse it.
// Failure modes: `ExecError::NotImplemented` when a referenced function has
//                no native code (checked before the toolchain is invoked);
//                `Toolchain` on compiler failure; `Protocol` on malformed
//                kernel output.
// Side effects: writes source and executables under the cache directory;
//               spawns the C++ compiler and the kernel process.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::codegen::NativeSource;
use crate::codeobject::{gather_slots, Backend, Outputs, Snapshot};
use crate::config::ToolchainConfig;
use crate::error::ExecError;
use crate::resolve::ResolvedSet;

/// Compilers probed when the configured one does not respond.
const FALLBACK_COMPILERS: [&str; 3] = ["c++", "g++", "clang++"];

/// Unique suffix for intermediate files (parallel builds share a cache dir).
static COUNTER: AtomicUsize = AtomicUsize::new(0);

// ── Toolchain ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NativeToolchain {
    cc: String,
    cflags: Vec<String>,
    cache_dir: PathBuf,
}

impl NativeToolchain {
    pub fn new(cc: impl Into<String>, cflags: Vec<String>, cache_dir: impl Into<PathBuf>) -> Self {
        NativeToolchain {
            cc: cc.into(),
            cflags,
            cache_dir: cache_dir.into(),
        }
    }

    /// Probe for a working C++ compiler: the configured one first, then the
    /// usual names. Returns `None` when nothing answers `--version`.
    pub fn detect(config: &ToolchainConfig) -> Option<Self> {
        let candidates =
            std::iter::once(config.cc.as_str()).chain(FALLBACK_COMPILERS.iter().copied());
        for cc in candidates {
            if compiler_works(cc) {
                debug!(cc, "native toolchain detected");
                return Some(NativeToolchain::new(
                    cc,
                    config.cflags.clone(),
                    config.cache_dir.clone(),
                ));
            }
        }
        debug!(configured = %config.cc, "no native toolchain found");
        None
    }

    pub fn cc(&self) -> &str {
        &self.cc
    }

    pub fn cflags(&self) -> &[String] {
        &self.cflags
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Content hash of everything that determines the built kernel.
    ///
    /// Hash key: `cc + "\0" + cflags.join("\0") + "\0" + source`
    /// Output: 64-char hex string.
    pub fn cache_key(&self, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cc.as_bytes());
        hasher.update(b"\0");
        for (i, flag) in self.cflags.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\0");
            }
            hasher.update(flag.as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(source.as_bytes());
        let hash = hasher.finalize();
        let mut key = String::with_capacity(64);
        for b in hash.iter() {
            let _ = write!(key, "{:02x}", b);
        }
        key
    }

    /// Path of the cached kernel for `source`, building it if absent.
    pub fn build(&self, source: &str) -> Result<PathBuf, ExecError> {
        let key = self.cache_key(source);
        let exe = self.cache_dir.join(format!("eqsim_{key}"));
        if exe.is_file() {
            debug!(path = %exe.display(), "native kernel cache hit");
            return Ok(exe);
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        let stem = format!(
            "eqsim_{key}_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let cpp = self.cache_dir.join(format!("{stem}.cpp"));
        let tmp = self.cache_dir.join(format!("{stem}.tmp"));
        std::fs::write(&cpp, source)?;

        info!(cc = %self.cc, path = %exe.display(), "compiling native kernel");
        let output = Command::new(&self.cc)
            .args(&self.cflags)
            .arg("-o")
            .arg(&tmp)
            .arg(&cpp)
            .output()
            .map_err(|e| ExecError::Toolchain {
                message: format!("failed to run `{}`: {e}", self.cc),
            })?;
        let _ = std::fs::remove_file(&cpp);
        if !output.status.success() {
            let _ = std::fs::remove_file(&tmp);
            return Err(ExecError::Toolchain {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Another process may have won the race; either copy is identical.
        std::fs::rename(&tmp, &exe)?;
        Ok(exe)
    }
}

fn compiler_works(cc: &str) -> bool {
    Command::new(cc)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

// ── Kernel protocol ─────────────────────────────────────────────────────────

fn encode_input(len: usize, t: f64, dt: f64, slots: &[Vec<f64>]) -> String {
    let mut input = String::with_capacity(17 * (2 + len * slots.len()) + 24);
    let _ = writeln!(input, "{len}");
    let _ = writeln!(input, "{:016x} {:016x}", t.to_bits(), dt.to_bits());
    for slot in slots {
        for v in slot {
            let _ = writeln!(input, "{:016x}", v.to_bits());
        }
    }
    input
}

fn decode_output(stdout: &str, len: usize, count: usize) -> Result<Vec<Vec<f64>>, ExecError> {
    let words: Vec<&str> = stdout.split_whitespace().collect();
    if words.len() != len * count {
        return Err(ExecError::Protocol {
            message: format!("expected {} values, kernel wrote {}", len * count, words.len()),
        });
    }
    let mut values = Vec::with_capacity(len * count);
    for word in words {
        let bits = u64::from_str_radix(word, 16).map_err(|e| ExecError::Protocol {
            message: format!("bad value `{word}`: {e}"),
        })?;
        values.push(f64::from_bits(bits));
    }
    if len == 0 {
        return Ok(vec![Vec::new(); count]);
    }
    Ok(values.chunks(len).map(<[f64]>::to_vec).collect())
}

fn run_kernel(exe: &Path, input: &str) -> Result<String, ExecError> {
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(ExecError::Protocol {
            message: format!(
                "kernel exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    String::from_utf8(output.stdout).map_err(|e| ExecError::Protocol {
        message: e.to_string(),
    })
}

// ── Code object ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NativeCode {
    resolved: ResolvedSet,
    source: NativeSource,
    toolchain: NativeToolchain,
    binary: Mutex<Option<PathBuf>>,
    builds: AtomicUsize,
}

impl NativeCode {
    pub fn new(resolved: ResolvedSet, source: NativeSource, toolchain: NativeToolchain) -> Self {
        NativeCode {
            resolved,
            source,
            toolchain,
            binary: Mutex::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn resolved(&self) -> &ResolvedSet {
        &self.resolved
    }

    pub fn source(&self) -> &NativeSource {
        &self.source
    }

    pub fn toolchain(&self) -> &NativeToolchain {
        &self.toolchain
    }

    /// Number of times this code object invoked the toolchain (0 or 1).
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn kernel(&self) -> Result<PathBuf, ExecError> {
        let mut binary = self.binary.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = binary.as_ref() {
            return Ok(path.clone());
        }
        let path = self.toolchain.build(&self.source.source)?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        *binary = Some(path.clone());
        Ok(path)
    }

    fn check_capabilities(&self) -> Result<(), ExecError> {
        match self.source.missing.first() {
            Some(function) => Err(ExecError::NotImplemented {
                function: function.clone(),
                backend: Backend::Native,
            }),
            None => Ok(()),
        }
    }

    /// Check native support for every referenced function and build the
    /// kernel if it is not built yet.
    pub fn prepare(&self) -> Result<(), ExecError> {
        self.check_capabilities()?;
        self.kernel().map(|_| ())
    }

    pub fn execute(&self, snapshot: &Snapshot<'_>) -> Result<Outputs, ExecError> {
        self.check_capabilities()?;
        let slots = gather_slots(&self.resolved.namespace, snapshot)?;
        let exe = self.kernel()?;
        let input = encode_input(snapshot.len, snapshot.t, snapshot.dt, &slots);
        let stdout = run_kernel(&exe, &input)?;
        let columns = decode_output(&stdout, snapshot.len, self.source.outputs.len())?;
        Ok(self.source.outputs.iter().cloned().zip(columns).collect())
    }
}
