//! C code generator for netlink protocol family specs.
//!
//! The pipeline is: load the YAML spec ([`nlspec`]), build the typed IR
//! ([`ir`]), run the resolver passes ([`resolver`]), then walk the IR
//! and emit one of three outputs ([`emit`]): the UAPI header, the
//! kernel-side policies/op-table, or the user-space library code.

pub mod emit;
pub mod ir;
pub mod names;
pub mod resolver;
pub mod shape;
pub mod writer;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

pub use emit::Mode;
use ir::Family;
use writer::CodeWriter;

/// Specs must carry the kernel's dual license.
pub const EXPECTED_LICENSE: &str = "((GPL-2.0 WITH Linux-syscall-note) OR BSD-3-Clause)";

#[derive(Debug)]
pub enum GenError {
    Spec(nlspec::SpecError),
    /// Resolution or emission failure; the message names the offender.
    Gen(String),
    Io(io::Error),
    BadPattern(regex::Error),
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::Spec(e) => write!(f, "{}", e),
            GenError::Gen(msg) => write!(f, "{}", msg),
            GenError::Io(e) => write!(f, "failed to write output: {}", e),
            GenError::BadPattern(e) => write!(f, "invalid --exclude-op pattern: {}", e),
        }
    }
}

impl std::error::Error for GenError {}

impl From<nlspec::SpecError> for GenError {
    fn from(e: nlspec::SpecError) -> Self {
        GenError::Spec(e)
    }
}

impl From<String> for GenError {
    fn from(e: String) -> Self {
        GenError::Gen(e)
    }
}

impl From<io::Error> for GenError {
    fn from(e: io::Error) -> Self {
        GenError::Io(e)
    }
}

impl From<regex::Error> for GenError {
    fn from(e: regex::Error) -> Self {
        GenError::BadPattern(e)
    }
}

/// Everything the driver hands to one generator run.
#[derive(Debug, Clone)]
pub struct GenOptions {
    pub mode: Mode,
    pub header: bool,
    pub spec: PathBuf,
    pub out_file: Option<PathBuf>,
    pub cmp_out: bool,
    pub user_headers: Vec<String>,
    pub exclude_ops: Vec<String>,
}

/// Walk up from the spec until a MAINTAINERS file marks the tree root,
/// and return the spec path relative to it. Outside a kernel tree the
/// path is used as given.
fn kernel_relative_spec_path(spec: &Path) -> String {
    let mut components: Vec<String> = Vec::new();
    let mut full = spec.to_path_buf();
    loop {
        let Some(base) = full.file_name().and_then(|b| b.to_str()) else {
            return spec.display().to_string();
        };
        components.insert(0, base.to_string());
        let Some(parent) = full.parent().map(Path::to_path_buf) else {
            return spec.display().to_string();
        };
        if parent.as_os_str().is_empty() {
            return spec.display().to_string();
        }
        if parent.join("MAINTAINERS").is_file() {
            return components.join("/");
        }
        full = parent;
    }
}

/// Run one full generation: parse, resolve, emit, write.
pub fn generate(opts: &GenOptions) -> Result<(), GenError> {
    let exclude: Vec<Regex> = opts
        .exclude_ops
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<_, _>>()?;

    let loaded = nlspec::LoadedFamily::load(&opts.spec, &exclude)?;
    if loaded.license != EXPECTED_LICENSE {
        return Err(GenError::Gen(format!(
            "Spec license: {}\nLicense must be: {}",
            loaded.license, EXPECTED_LICENSE
        )));
    }

    let mut family = Family::new(loaded)?;
    resolver::resolve(&mut family)?;

    let mut cw = CodeWriter::new();
    let spec_rel = kernel_relative_spec_path(&opts.spec);
    emit::emit_banner(
        &mut cw,
        &family,
        opts.mode,
        opts.header,
        &spec_rel,
        &opts.user_headers,
        &opts.exclude_ops,
    );

    if opts.mode == Mode::Uapi {
        emit::uapi::render(&family, &mut cw)?;
        return Ok(cw.finish(opts.out_file.as_deref(), opts.cmp_out)?);
    }

    let hdr_prot = format!("_LINUX_{}_GEN_H", family.c_name.to_uppercase());
    if opts.header {
        cw.p(&format!("#ifndef {}", hdr_prot));
        cw.p(&format!("#define {}", hdr_prot));
        cw.nl();
    }

    let hdr_file = match &opts.out_file {
        Some(out) => {
            let base = out
                .file_name()
                .and_then(|b| b.to_str())
                .unwrap_or("generated_header_file.c");
            let stem = &base[..base.len().saturating_sub(2)];
            format!("{}.h", stem)
        }
        None => "generated_header_file.h".to_string(),
    };

    emit::emit_includes(
        &mut cw,
        &family,
        opts.mode,
        opts.header,
        &hdr_file,
        opts.out_file.is_some(),
        &opts.user_headers,
    )?;

    match (opts.mode, opts.header) {
        (Mode::Kernel, true) => emit::kernel::render_header(&family, &mut cw)?,
        (Mode::Kernel, false) => emit::kernel::render_source(&family, &mut cw)?,
        (Mode::User, true) => emit::user::render_header(&family, &mut cw)?,
        (Mode::User, false) => emit::user::render_source(&family, &mut cw)?,
        (Mode::Uapi, _) => unreachable!("handled above"),
    }

    if opts.header {
        cw.p(&format!("#endif /* {} */", hdr_prot));
    }

    Ok(cw.finish(opts.out_file.as_deref(), opts.cmp_out)?)
}
