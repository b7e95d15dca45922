//! Output rendering: shared naming helpers, file prologue, and the
//! three emission modes.

mod attrs;
pub mod kernel;
pub mod uapi;
pub mod user;

use crate::ir::{Family, OpMode};
use crate::shape::{dir_suffix, Direction, RenderInfo};
use crate::writer::CodeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Uapi,
    Kernel,
    User,
}

impl Mode {
    pub fn tag(self) -> &'static str {
        match self {
            Mode::Uapi => "uapi",
            Mode::Kernel => "kernel",
            Mode::User => "user",
        }
    }
}

fn op_mode_wrapper(mode: OpMode) -> &'static str {
    match mode {
        OpMode::Do | OpMode::Event => "",
        OpMode::Dump => "_list",
        OpMode::Notify => "_ntf",
    }
}

/// Stem of every generated symbol for one op/direction combination.
pub fn op_prefix(
    family: &Family,
    ri: &RenderInfo,
    direction: Option<Direction>,
    deref: bool,
) -> String {
    let mut suffix = format!("_{}", ri.type_name);

    match ri.op_mode {
        None => {}
        Some(OpMode::Do) => suffix.push_str(dir_suffix(direction)),
        Some(mode) => {
            if direction == Some(Direction::Request) {
                suffix.push_str("_req");
                if !ri.type_oneside {
                    suffix.push_str("_dump");
                }
            } else if ri.type_consistent {
                if deref {
                    suffix.push_str(dir_suffix(direction));
                } else {
                    suffix.push_str(op_mode_wrapper(mode));
                }
            } else {
                suffix.push_str("_rsp");
                suffix.push_str(if deref { "_dump" } else { "_list" });
            }
        }
    }

    format!("{}{}", family.c_name, suffix)
}

pub fn type_name(
    family: &Family,
    ri: &RenderInfo,
    direction: Option<Direction>,
    deref: bool,
) -> String {
    format!("struct {}", op_prefix(family, ri, direction, deref))
}

pub fn free_arg_name(direction: Option<Direction>) -> &'static str {
    match direction {
        Some(Direction::Request) => "req",
        Some(Direction::Reply) => "rsp",
        None => "obj",
    }
}

pub fn call_free(family: &Family, ri: &RenderInfo, direction: Direction, var: &str) -> String {
    format!(
        "{}_free({});",
        op_prefix(family, ri, Some(direction), false),
        var
    )
}

pub fn print_prototype(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Direction,
    terminate: bool,
    doc: Option<&str>,
) {
    let suffix = if terminate { ";" } else { "" };
    let op = ri.op(family).expect("prototype needs an operation");

    let mut fname = op.render_name.clone();
    if ri.op_mode == Some(OpMode::Dump) {
        fname.push_str("_dump");
    }

    let mut args = vec!["struct ynl_sock *ys".to_string()];
    if ri.mode_has_request(family) {
        args.push(format!(
            "{} *{}",
            type_name(family, ri, Some(direction), false),
            &direction.suffix()[1..]
        ));
    }

    let ret = if ri.mode_has_reply(family) {
        format!("{} *", type_name(family, ri, Some(direction.other()), false))
    } else {
        "int".to_string()
    };

    cw.write_func_prot(&ret, &fname, &args, doc, suffix);
}

pub fn print_req_prototype(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) {
    let doc = ri
        .op(family)
        .and_then(|o| o.spec.doc.clone());
    print_prototype(family, ri, cw, Direction::Request, true, doc.as_deref());
}

pub fn print_dump_prototype(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) {
    print_prototype(family, ri, cw, Direction::Request, true, None);
}

/// Banner common to every generated file.
pub fn emit_banner(
    cw: &mut CodeWriter,
    family: &Family,
    mode: Mode,
    header: bool,
    spec_path: &str,
    user_headers: &[String],
    exclude_ops: &[String],
) {
    if mode == Mode::Uapi || header {
        cw.p(&format!("/* SPDX-License-Identifier: {} */", family.license));
    } else {
        cw.p(&format!("// SPDX-License-Identifier: {}", family.license));
    }
    cw.p("/* Do not edit directly, auto-generated from: */");
    cw.p(&format!("/*\t{} */", spec_path));
    cw.p(&format!(
        "/* YNL-GEN {} {} */",
        mode.tag(),
        if header { "header" } else { "source" }
    ));
    if !exclude_ops.is_empty() || !user_headers.is_empty() {
        let mut line = String::new();
        for one in user_headers {
            line.push_str(&format!(" --user-header {}", one));
        }
        for one in exclude_ops {
            line.push_str(&format!(" --exclude-op {}", one));
        }
        cw.p(&format!("/* YNL-ARG{} */", line));
    }
    cw.nl();
}

/// Mode-specific include block at the top of kernel/user files.
pub fn emit_includes(
    cw: &mut CodeWriter,
    family: &Family,
    mode: Mode,
    header: bool,
    hdr_file: &str,
    have_out_file: bool,
    user_headers: &[String],
) -> Result<(), String> {
    let mut headers: Vec<String> = Vec::new();
    if mode == Mode::Kernel {
        cw.p("#include <net/netlink.h>");
        cw.p("#include <net/genetlink.h>");
        cw.nl();
        if !header {
            if have_out_file {
                cw.p(&format!("#include \"{}\"", hdr_file));
            }
            cw.nl();
        }
        headers.push(format!("uapi/{}", family.uapi_header));
        headers.extend(family.kernel_family.headers.iter().cloned());
    } else {
        cw.p("#include <stdlib.h>");
        cw.p("#include <string.h>");
        if header {
            cw.p("#include <linux/types.h>");
            if user::family_contains_bitfield32(family) {
                cw.p("#include <linux/netlink.h>");
            }
        } else {
            cw.p(&format!("#include \"{}\"", hdr_file));
            cw.p("#include \"ynl.h\"");
        }
    }

    for def in &family.raw.definitions {
        if let Some(h) = &def.header {
            headers.push(h.clone());
        }
    }
    for set in &family.raw.attribute_sets {
        if let Some(h) = &set.header {
            headers.push(h.clone());
        }
    }
    if mode == Mode::User {
        headers.push(family.uapi_header.clone());
    }

    let mut seen: Vec<&str> = Vec::new();
    for one in &headers {
        if !seen.contains(&one.as_str()) {
            cw.p(&format!("#include <{}>", one));
            seen.push(one);
        }
    }
    cw.nl();

    if mode == Mode::User {
        if !header {
            cw.p("#include <linux/genetlink.h>");
            cw.nl();
            for one in user_headers {
                cw.p(&format!("#include \"{}\"", one));
            }
        } else {
            cw.p("struct ynl_sock;");
            cw.nl();
            user::render_user_family(family, cw, true)?;
        }
        cw.nl();
    }
    Ok(())
}
