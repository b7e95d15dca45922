//! UAPI header output: family defines, definition enums, attribute-set
//! enums, command enums and multicast group defines.

use nlspec::ConstValue;

use crate::ir::{EnumSet, Family};
use crate::names::{c_lower, c_upper};
use crate::writer::{CodeWriter, DefineValue};

fn uapi_enum_start(
    family: &Family,
    cw: &mut CodeWriter,
    enum_name_key: &Option<Option<String>>,
    ckey_value: Option<&str>,
) {
    let start_line = match enum_name_key {
        Some(Some(n)) => format!("enum {}", c_lower(n)),
        Some(None) => "enum".to_string(),
        None => match ckey_value {
            Some(v) => format!("enum {}_{}", family.c_name, c_lower(v)),
            None => "enum".to_string(),
        },
    };
    cw.block_start(&start_line);
}

fn write_enum_doc(cw: &mut CodeWriter, enum_set: &EnumSet) {
    if !enum_set.has_doc() {
        return;
    }
    if enum_set.has_entry_doc() {
        cw.p("/**");
        let mut doc = String::new();
        if let Some(d) = &enum_set.doc {
            doc = format!(" - {}", d);
        }
        let name = enum_set
            .enum_name
            .as_deref()
            .unwrap_or(&enum_set.render_name);
        cw.write_doc_line(&format!("{}{}", name, doc), true);
    } else {
        cw.p("/*");
        cw.write_doc_line(enum_set.doc.as_deref().unwrap_or(""), false);
    }
    for entry in enum_set.entries.values() {
        if let Some(entry_doc) = &entry.doc {
            cw.write_doc_line(&format!("@{}: {}", entry.c_name, entry_doc), true);
        }
    }
    cw.p(" */");
}

fn render_definitions(family: &Family, cw: &mut CodeWriter) {
    let mut defines: Vec<(String, DefineValue)> = Vec::new();
    for def in &family.raw.definitions {
        if def.header.is_some() {
            continue;
        }

        if def.def_type != "const" {
            cw.writes_defines(&defines);
            defines.clear();
            cw.nl();
        }

        if def.def_type == "enum" || def.def_type == "flags" {
            let enum_set = family.consts[&def.name].enum_set.as_ref().unwrap();

            if enum_set.header.is_some() {
                continue;
            }

            write_enum_doc(cw, enum_set);

            uapi_enum_start(family, cw, &def.enum_name, Some(&def.name));
            let name_pfx = def
                .name_prefix
                .clone()
                .unwrap_or_else(|| format!("{}-{}-", family.ident_name, def.name));
            for entry in enum_set.entries.values() {
                let suffix = if entry.value_change {
                    format!(" = {},", enum_set.user_value(entry, false))
                } else {
                    ",".to_string()
                };
                cw.p(&format!("{}{}", entry.c_name, suffix));
            }

            if def.render_max {
                cw.nl();
                cw.p("/* private: */");
                if def.def_type == "flags" {
                    let max_name = c_upper(&format!("{}mask", name_pfx));
                    cw.p(&format!("{} = {},", max_name, enum_set.get_mask(false)));
                } else {
                    let cnt_name = enum_set
                        .enum_cnt_name
                        .clone()
                        .unwrap_or_else(|| format!("__{}max", name_pfx));
                    let max_name = c_upper(&format!("{}max", name_pfx));
                    cw.p(&format!("{},", c_upper(&cnt_name)));
                    cw.p(&format!("{} = ({} - 1)", max_name, c_upper(&cnt_name)));
                }
            }
            cw.block_end(";");
            cw.nl();
        } else if def.def_type == "const" {
            let name = c_upper(&format!("{}-{}", family.ident_name, def.name));
            let value = match &def.value {
                Some(ConstValue::Int(v)) => DefineValue::Int(*v as i128),
                Some(ConstValue::Str(s)) => DefineValue::Str(s.clone()),
                None => DefineValue::Int(0),
            };
            defines.push((name, value));
        }
    }

    if !defines.is_empty() {
        cw.writes_defines(&defines);
        cw.nl();
    }
}

fn render_attr_sets(family: &Family, cw: &mut CodeWriter, max_by_define: bool) {
    for attr_set in family.attr_sets.values() {
        if attr_set.subset_of.is_some() {
            continue;
        }

        let max_value = format!("({} - 1)", attr_set.cnt_name);

        let mut val = 0;
        uapi_enum_start(family, cw, &attr_set.enum_name_key, None);
        for attr in attr_set.attrs.values() {
            let suffix = if attr.value != val {
                val = attr.value;
                format!(" = {},", attr.value)
            } else {
                ",".to_string()
            };
            val += 1;
            cw.p(&format!("{}{}", attr.enum_name, suffix));
        }
        if !attr_set.attrs.is_empty() {
            cw.nl();
        }
        cw.p(&format!(
            "{}{}",
            attr_set.cnt_name,
            if max_by_define { "" } else { "," }
        ));
        if !max_by_define {
            cw.p(&format!("{} = {}", attr_set.max_name, max_value));
        }
        cw.block_end(";");
        if max_by_define {
            cw.p(&format!("#define {} {}", attr_set.max_name, max_value));
        }
        cw.nl();
    }
}

fn render_uapi_unified(family: &Family, cw: &mut CodeWriter, max_by_define: bool, separate_ntf: bool) {
    let max_name = c_upper(
        family
            .raw
            .cmd_max_name
            .as_deref()
            .unwrap_or(&format!("{}MAX", family.op_prefix)),
    );
    let cnt_name = c_upper(
        family
            .raw
            .cmd_cnt_name
            .as_deref()
            .unwrap_or(&format!("__{}MAX", family.op_prefix)),
    );
    let max_value = format!("({} - 1)", cnt_name);

    uapi_enum_start(family, cw, &family.raw.operations.enum_name, None);
    let mut val = 0;
    for op in family.msgs.values() {
        if separate_ntf && op.is_async {
            continue;
        }

        let op_value = op.req_value.unwrap_or(0);
        let suffix = if op_value != val {
            val = op_value;
            format!(" = {},", op_value)
        } else {
            ",".to_string()
        };
        cw.p(&format!("{}{}", op.enum_name, suffix));
        val += 1;
    }
    cw.nl();
    cw.p(&format!(
        "{}{}",
        cnt_name,
        if max_by_define { "" } else { "," }
    ));
    if !max_by_define {
        cw.p(&format!("{} = {}", max_name, max_value));
    }
    cw.block_end(";");
    if max_by_define {
        cw.p(&format!("#define {} {}", max_name, max_value));
    }
    cw.nl();
}

fn render_uapi_directional(family: &Family, cw: &mut CodeWriter, max_by_define: bool) {
    let max_name = format!("{}USER_MAX", family.op_prefix);
    let cnt_name = format!("__{}USER_CNT", family.op_prefix);
    let max_value = format!("({} - 1)", cnt_name);

    cw.block_start("enum");
    cw.p(&c_upper(&format!("{}_MSG_USER_NONE = 0,", family.name)));
    let mut val = 0;
    for op in family.msgs.values() {
        if op.has_mode(crate::ir::OpMode::Do) && !op.has_mode(crate::ir::OpMode::Event) {
            let suffix = match op.req_value {
                Some(v) if v != val => {
                    val = v;
                    format!(" = {},", v)
                }
                _ => ",".to_string(),
            };
            cw.p(&format!("{}{}", op.enum_name, suffix));
            val += 1;
        }
    }
    cw.nl();
    cw.p(&format!(
        "{}{}",
        cnt_name,
        if max_by_define { "" } else { "," }
    ));
    if !max_by_define {
        cw.p(&format!("{} = {}", max_name, max_value));
    }
    cw.block_end(";");
    if max_by_define {
        cw.p(&format!("#define {} {}", max_name, max_value));
    }
    cw.nl();

    let max_name = format!("{}KERNEL_MAX", family.op_prefix);
    let cnt_name = format!("__{}KERNEL_CNT", family.op_prefix);
    let max_value = format!("({} - 1)", cnt_name);

    cw.block_start("enum");
    cw.p(&c_upper(&format!("{}_MSG_KERNEL_NONE = 0,", family.name)));
    let mut val = 0;
    for op in family.msgs.values() {
        let has_do_reply = op.reply_of(crate::ir::OpMode::Do).is_some()
            && op.has_mode(crate::ir::OpMode::Do)
            && !op.is_async;
        if has_do_reply || op.is_async {
            let mut enum_name = op.enum_name.clone();
            if !op.is_async {
                enum_name = format!("{}_REPLY", enum_name);
            }

            let suffix = match op.rsp_value {
                Some(v) if v != val => {
                    val = v;
                    format!(" = {},", v)
                }
                _ => ",".to_string(),
            };
            cw.p(&format!("{}{}", enum_name, suffix));
            val += 1;
        }
    }
    cw.nl();
    cw.p(&format!(
        "{}{}",
        cnt_name,
        if max_by_define { "" } else { "," }
    ));
    if !max_by_define {
        cw.p(&format!("{} = {}", max_name, max_value));
    }
    cw.block_end(";");
    if max_by_define {
        cw.p(&format!("#define {} {}", max_name, max_value));
    }
    cw.nl();
}

pub fn render(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    let hdr_prot = format!(
        "_UAPI_LINUX_{}_H",
        c_upper(&family.uapi_header_name).replace('/', "_")
    );
    cw.p(&format!("#ifndef {}", hdr_prot));
    cw.p(&format!("#define {}", hdr_prot));
    cw.nl();

    let defines = vec![
        (
            family.fam_key.clone(),
            DefineValue::Str(family.name.clone()),
        ),
        (
            family.ver_key.clone(),
            DefineValue::Int(family.raw.version.unwrap_or(1) as i128),
        ),
    ];
    cw.writes_defines(&defines);
    cw.nl();

    render_definitions(family, cw);

    let max_by_define = family.raw.max_by_define;
    render_attr_sets(family, cw, max_by_define);

    // Commands.
    let separate_ntf = family.raw.operations.async_prefix.is_some();

    match family.msg_id_model.as_str() {
        "unified" => render_uapi_unified(family, cw, max_by_define, separate_ntf),
        "directional" => render_uapi_directional(family, cw, max_by_define),
        other => {
            return Err(format!("Unsupported message enum-model {}", other));
        }
    }

    if separate_ntf {
        uapi_enum_start(family, cw, &family.raw.operations.async_enum, None);
        for op in family.msgs.values() {
            if !op.is_async {
                continue;
            }

            let suffix = match op.spec.value {
                Some(v) => format!(" = {},", v),
                None => ",".to_string(),
            };
            cw.p(&format!("{}{}", op.enum_name, suffix));
        }
        cw.block_end(";");
        cw.nl();
    }

    // Multicast groups.
    let mut defines: Vec<(String, DefineValue)> = Vec::new();
    for grp in &family.mcast_groups {
        let name = grp
            .c_define_name
            .clone()
            .unwrap_or_else(|| format!("{}-mcgrp-{}", family.ident_name, grp.name));
        defines.push((c_upper(&name), DefineValue::Str(grp.name.clone())));
    }
    cw.nl();
    if !defines.is_empty() {
        cw.writes_defines(&defines);
        cw.nl();
    }

    cw.p(&format!("#endif /* {} */", hdr_prot));
    Ok(())
}
