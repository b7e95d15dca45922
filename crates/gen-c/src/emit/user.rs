//! User-space output: typed request/response structs, serializers,
//! parsers, free routines, notification table and family descriptor.

use crate::ir::{AttrKind, EnumSet, EnumType, Family, OpMode, Presence};
use crate::names::c_lower;
use crate::shape::{Direction, RenderInfo, Space, StructShape};
use crate::writer::CodeWriter;

use super::{
    call_free, free_arg_name, op_prefix, print_dump_prototype, print_prototype,
    print_req_prototype, type_name,
};

pub fn family_contains_bitfield32(family: &Family) -> bool {
    for attr_set in family.attr_sets.values() {
        if attr_set.subset_of.is_some() {
            continue;
        }
        for attr in attr_set.attrs.values() {
            if attr.attr_type == "bitfield32" {
                return true;
            }
        }
    }
    false
}

fn put_typol_submsg(family: &Family, cw: &mut CodeWriter, shape: &StructShape) {
    cw.block_start(&format!(
        "const struct ynl_policy_attr {}_policy[] =",
        shape.render_name
    ));

    let mut i = 0;
    for attr in shape.member_list(family) {
        let nest = if attr.attr_type == "nest" {
            format!(" .nest = &{}_nest,", attr.nested().render_name)
        } else {
            String::new()
        };
        cw.p(&format!(
            "[{}] = {{ .type = YNL_PT_SUBMSG, .name = \"{}\",{} }},",
            i, attr.name, nest
        ));
        i += 1;
    }

    cw.block_end(";");
    cw.nl();

    cw.block_start(&format!(
        "const struct ynl_policy_nest {}_nest =",
        shape.render_name
    ));
    cw.p(&format!(".max_attr = {},", i - 1));
    cw.p(&format!(".table = {}_policy,", shape.render_name));
    cw.block_end(";");
    cw.nl();
}

pub fn put_typol_fwd(cw: &mut CodeWriter, shape: &StructShape) {
    cw.p(&format!(
        "extern const struct ynl_policy_nest {}_nest;",
        shape.render_name
    ));
}

pub fn put_typol(family: &Family, cw: &mut CodeWriter, shape: &StructShape) -> Result<(), String> {
    if shape.submsg.is_some() {
        put_typol_submsg(family, cw, shape);
        return Ok(());
    }

    let type_max = &family.attr_sets[&shape.space_name].max_name;
    cw.block_start(&format!(
        "const struct ynl_policy_attr {}_policy[{} + 1] =",
        shape.render_name, type_max
    ));

    for attr in shape.member_list(family) {
        attr.emit_attr_typol(family, cw)?;
    }

    cw.block_end(";");
    cw.nl();

    cw.block_start(&format!(
        "const struct ynl_policy_nest {}_nest =",
        shape.render_name
    ));
    cw.p(&format!(".max_attr = {},", type_max));
    cw.p(&format!(".table = {}_policy,", shape.render_name));
    cw.block_end(";");
    cw.nl();
    Ok(())
}

fn put_enum_to_str_helper(
    cw: &mut CodeWriter,
    render_name: &str,
    map_name: &str,
    arg_name: &str,
    enum_set: Option<&EnumSet>,
) {
    let args = match enum_set {
        Some(e) => vec![format!("{} {}", e.user_type, arg_name)],
        None => vec![format!("int {}", arg_name)],
    };
    cw.write_func_prot("const char *", &format!("{}_str", render_name), &args, None, "");
    cw.block_start("");
    if enum_set.is_some_and(|e| e.enum_type == EnumType::Flags) {
        cw.p(&format!("{} = ffs({}) - 1;", arg_name, arg_name));
    }
    cw.p(&format!(
        "if ({} < 0 || {} >= (int)YNL_ARRAY_SIZE({}))",
        arg_name, arg_name, map_name
    ));
    cw.p("return NULL;");
    cw.p(&format!("return {}[{}];", map_name, arg_name));
    cw.block_end("");
    cw.nl();
}

pub fn put_op_name_fwd(family: &Family, cw: &mut CodeWriter) {
    cw.write_func_prot(
        "const char *",
        &format!("{}_op_str", family.c_name),
        &["int op".to_string()],
        None,
        ";",
    );
}

pub fn put_op_name(family: &Family, cw: &mut CodeWriter) {
    let map_name = format!("{}_op_strmap", family.c_name);
    cw.block_start(&format!("static const char * const {}[] =", map_name));
    for op in family.msgs.values() {
        let Some(rsp_value) = op.rsp_value else {
            continue;
        };
        // Legacy families can produce one reply value from several
        // commands; keep the first.
        if family.rsp_by_value[&rsp_value] != op.name {
            cw.p(&format!("// skip \"{}\", duplicate reply value", op.name));
            continue;
        }

        if op.req_value == op.rsp_value {
            cw.p(&format!("[{}] = \"{}\",", op.enum_name, op.name));
        } else {
            cw.p(&format!("[{}] = \"{}\",", rsp_value, op.name));
        }
    }
    cw.block_end(";");
    cw.nl();

    put_enum_to_str_helper(cw, &format!("{}_op", family.c_name), &map_name, "op", None);
}

pub fn put_enum_to_str_fwd(cw: &mut CodeWriter, enum_set: &EnumSet) {
    let args = vec![format!("{} value", enum_set.user_type)];
    cw.write_func_prot(
        "const char *",
        &format!("{}_str", enum_set.render_name),
        &args,
        None,
        ";",
    );
}

pub fn put_enum_to_str(cw: &mut CodeWriter, enum_set: &EnumSet) {
    let map_name = format!("{}_strmap", enum_set.render_name);
    cw.block_start(&format!("static const char * const {}[] =", map_name));
    for entry in enum_set.entries.values() {
        cw.p(&format!("[{}] = \"{}\",", entry.value, entry.name));
    }
    cw.block_end(";");
    cw.nl();

    put_enum_to_str_helper(cw, &enum_set.render_name, &map_name, "value", Some(enum_set));
}

fn put_req_nested_prototype(
    cw: &mut CodeWriter,
    shape: &StructShape,
    suffix: &str,
) {
    let func_args = vec![
        "struct nlmsghdr *nlh".to_string(),
        "unsigned int attr_type".to_string(),
        format!("{}obj", shape.ptr_name),
    ];
    cw.write_func_prot(
        "int",
        &format!("{}_put", shape.render_name),
        &func_args,
        None,
        suffix,
    );
}

fn put_req_nested(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
) -> Result<(), String> {
    let mut local_vars = Vec::new();
    let mut init_lines = Vec::new();

    if shape.submsg.is_none() {
        local_vars.push("struct nlattr *nest;".to_string());
        init_lines.push("nest = ynl_attr_nest_start(nlh, attr_type);".to_string());
    }
    if let Some(fixed_header) = &shape.fixed_header {
        local_vars.push("void *hdr;".to_string());
        let struct_sz = format!("sizeof({})", fixed_header);
        init_lines.push(format!(
            "hdr = ynl_nlmsg_put_extra_header(nlh, {});",
            struct_sz
        ));
        init_lines.push(format!("memcpy(hdr, &obj->_hdr, {});", struct_sz));
    }

    let mut has_anest = false;
    let mut has_count = false;
    for attr in shape.member_list(family) {
        has_anest |= attr.attr_type == "indexed-array";
        has_count |= attr.presence_type() == Presence::Count;
    }
    if has_anest {
        local_vars.push("struct nlattr *array;".to_string());
    }
    if has_count {
        local_vars.push("unsigned int i;".to_string());
    }

    put_req_nested_prototype(cw, shape, "");
    cw.block_start("");
    cw.write_func_lvar(local_vars);

    for line in &init_lines {
        cw.p(line);
    }

    for attr in shape.member_list(family) {
        attr.attr_put(family, ri, cw, "obj")?;
    }

    if shape.submsg.is_none() {
        cw.p("ynl_attr_nest_end(nlh, nest);");
    }

    cw.nl();
    cw.p("return 0;");
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn multi_parse(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
    mut init_lines: Vec<String>,
    mut local_vars: Vec<String>,
) -> Result<(), String> {
    if shape.fixed_header.is_some() {
        local_vars.push("void *hdr;".to_string());
    }
    let iter_line = if shape.nested {
        match &shape.fixed_header {
            Some(fh) => format!("ynl_attr_for_each_nested_off(attr, nested, sizeof({}))", fh),
            None => "ynl_attr_for_each_nested(attr, nested)".to_string(),
        }
    } else {
        let op = ri.op(family).expect("message parse needs an operation");
        if op.fixed_header != family.fixed_header {
            if family.is_classic() {
                format!(
                    "ynl_attr_for_each(attr, nlh, sizeof({}))",
                    shape.fixed_header.as_deref().unwrap_or_default()
                )
            } else {
                return Err("Per-op fixed header not supported, yet".to_string());
            }
        } else {
            "ynl_attr_for_each(attr, nlh, yarg->ys->family->hdr_len)".to_string()
        }
    };

    let mut array_nests: Vec<String> = Vec::new();
    let mut multi_attrs: Vec<String> = Vec::new();
    let mut needs_parg = false;
    for attr in shape.member_list(family) {
        if attr.kind == AttrKind::ArrayNest {
            local_vars.push(format!("const struct nlattr *attr_{};", attr.c_name));
            array_nests.push(attr.name.clone());
        }
        if attr.multi {
            multi_attrs.push(attr.name.clone());
        }
        needs_parg |= attr.nested.is_some();
    }
    if !array_nests.is_empty() || !multi_attrs.is_empty() {
        local_vars.push("int i;".to_string());
    }
    if needs_parg {
        local_vars.push("struct ynl_parse_arg parg;".to_string());
        init_lines.push("parg.ys = yarg->ys;".to_string());
    }

    let mut all_multi: Vec<String> = array_nests.iter().chain(multi_attrs.iter()).cloned().collect();
    all_multi.sort();
    array_nests.sort();
    multi_attrs.sort();

    let set = &family.attr_sets[&shape.space_name];
    for anest in &all_multi {
        local_vars.push(format!("unsigned int n_{} = 0;", set.attrs[anest].c_name));
    }

    cw.block_start("");
    cw.write_func_lvar(local_vars);

    for line in &init_lines {
        cw.p(line);
    }
    cw.nl();

    for arg in &shape.inherited {
        cw.p(&format!("dst->{} = {};", arg, arg));
    }

    if let Some(fixed_header) = &shape.fixed_header {
        if shape.nested {
            cw.p("hdr = ynl_attr_data(nested);");
        } else if family.is_classic() {
            cw.p("hdr = ynl_nlmsg_data(nlh);");
        } else {
            cw.p("hdr = ynl_nlmsg_data_offset(nlh, sizeof(struct genlmsghdr));");
        }
        cw.p(&format!("memcpy(&dst->_hdr, hdr, sizeof({}));", fixed_header));
    }
    for anest in &all_multi {
        let aspec = &set.attrs[anest];
        cw.p(&format!("if (dst->{})", aspec.c_name));
        cw.p(&format!(
            "return ynl_error_parse(yarg, \"attribute already present ({}.{})\");",
            set.name, aspec.name
        ));
    }

    cw.nl();
    cw.block_start(&iter_line);
    cw.p("unsigned int type = ynl_attr_type(attr);");
    cw.nl();

    let mut first = true;
    for attr in shape.member_list(family) {
        let good = attr.attr_get(family, cw, "dst", first)?;
        // First may be 'unused' or 'pad', ignore those.
        first &= !good;
    }

    cw.block_end("");
    cw.nl();

    for anest in &array_nests {
        let aspec = &set.attrs[anest];

        cw.block_start(&format!("if (n_{})", aspec.c_name));
        cw.p(&format!(
            "dst->{} = calloc(n_{}, sizeof(*dst->{}));",
            aspec.c_name, aspec.c_name, aspec.c_name
        ));
        cw.p(&format!("dst->_count.{} = n_{};", aspec.c_name, aspec.c_name));
        cw.p("i = 0;");
        if aspec.sub_type.as_deref() == Some("nest") {
            cw.p(&format!(
                "parg.rsp_policy = &{}_nest;",
                aspec.nested().render_name
            ));
        }
        cw.block_start(&format!("ynl_attr_for_each_nested(attr, attr_{})", aspec.c_name));
        if aspec.sub_type.as_deref() == Some("nest") {
            cw.p(&format!("parg.data = &dst->{}[i];", aspec.c_name));
            cw.p(&format!(
                "if ({}_parse(&parg, attr, ynl_attr_type(attr)))",
                aspec.nested().render_name
            ));
            cw.p("return YNL_PARSE_CB_ERROR;");
        } else if aspec.sub_type.as_deref().is_some_and(crate::ir::is_scalar_type) {
            cw.p(&format!(
                "dst->{}[i] = ynl_attr_get_{}(attr);",
                aspec.c_name,
                aspec.sub_type.as_deref().unwrap()
            ));
        } else if aspec.sub_type.as_deref() == Some("binary") && aspec.checks.exact_len.is_some() {
            // Length is validated by the policy.
            cw.p(&format!(
                "memcpy(dst->{}[i], ynl_attr_data(attr), {});",
                aspec.c_name,
                aspec
                    .get_limit_str(family, crate::ir::LimitKind::ExactLen, "")?
            ));
        } else {
            return Err(format!("Nest parsing type not supported in {}", aspec.name));
        }
        cw.p("i++;");
        cw.block_end("");
        cw.block_end("");
    }
    cw.nl();

    for anest in &multi_attrs {
        let aspec = &set.attrs[anest];
        cw.block_start(&format!("if (n_{})", aspec.c_name));
        cw.p(&format!(
            "dst->{} = calloc(n_{}, sizeof(*dst->{}));",
            aspec.c_name, aspec.c_name, aspec.c_name
        ));
        cw.p(&format!("dst->_count.{} = n_{};", aspec.c_name, aspec.c_name));
        cw.p("i = 0;");
        if aspec.attr_type == "nest" {
            cw.p(&format!(
                "parg.rsp_policy = &{}_nest;",
                aspec.nested().render_name
            ));
        }
        cw.block_start(&iter_line);
        cw.block_start(&format!("if (ynl_attr_type(attr) == {})", aspec.enum_name));
        if aspec.attr_type == "nest" {
            cw.p(&format!("parg.data = &dst->{}[i];", aspec.c_name));
            cw.p(&format!(
                "if ({}_parse(&parg, attr))",
                aspec.nested().render_name
            ));
            cw.p("return YNL_PARSE_CB_ERROR;");
        } else if crate::ir::is_scalar_type(&aspec.attr_type) {
            cw.p(&format!(
                "dst->{}[i] = ynl_attr_get_{}(attr);",
                aspec.c_name, aspec.attr_type
            ));
        } else if aspec.attr_type == "binary" && aspec.struct_ref.is_some() {
            cw.p("size_t len = ynl_attr_data_len(attr);");
            cw.nl();
            cw.p(&format!("if (len > sizeof(dst->{}[0]))", aspec.c_name));
            cw.p(&format!("len = sizeof(dst->{}[0]);", aspec.c_name));
            cw.p(&format!(
                "memcpy(&dst->{}[i], ynl_attr_data(attr), len);",
                aspec.c_name
            ));
        } else if aspec.attr_type == "string" {
            cw.p("unsigned int len;");
            cw.nl();
            cw.p("len = strnlen(ynl_attr_get_str(attr), ynl_attr_data_len(attr));");
            cw.p(&format!(
                "dst->{}[i] = malloc(sizeof(struct ynl_string) + len + 1);",
                aspec.c_name
            ));
            cw.p(&format!("dst->{}[i]->len = len;", aspec.c_name));
            cw.p(&format!(
                "memcpy(dst->{}[i]->str, ynl_attr_get_str(attr), len);",
                aspec.c_name
            ));
            cw.p(&format!("dst->{}[i]->str[len] = 0;", aspec.c_name));
        } else {
            return Err(format!(
                "Nest parsing of type {} not supported yet",
                aspec.attr_type
            ));
        }
        cw.p("i++;");
        cw.block_end("");
        cw.block_end("");
        cw.block_end("");
    }
    cw.nl();

    if shape.nested {
        cw.p("return 0;");
    } else {
        cw.p("return YNL_PARSE_CB_OK;");
    }
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn parse_rsp_nested_prototype(
    family: &Family,
    cw: &mut CodeWriter,
    shape: &StructShape,
    suffix: &str,
) {
    let mut func_args = vec![
        "struct ynl_parse_arg *yarg".to_string(),
        "const struct nlattr *nested".to_string(),
    ];
    for sel in shape.external_selectors(family) {
        func_args.push(format!("const char *_sel_{}", sel));
    }
    if shape.submsg.is_some() {
        func_args.insert(1, "const char *sel".to_string());
    }
    for arg in &shape.inherited {
        func_args.push(format!("__u32 {}", arg));
    }

    cw.write_func_prot(
        "int",
        &format!("{}_parse", shape.render_name),
        &func_args,
        None,
        suffix,
    );
}

fn parse_rsp_submsg(
    family: &Family,
    _ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
) -> Result<(), String> {
    parse_rsp_nested_prototype(family, cw, shape, "");

    let var = "dst";
    let mut local_vars: Vec<String> = vec![
        "const struct nlattr *attr = nested;".to_string(),
        format!("{}{} = yarg->data;", shape.ptr_name, var),
        "struct ynl_parse_arg parg;".to_string(),
    ];

    for attr in shape.member_list(family) {
        let (_, _, l_vars) = attr.attr_get_parts(family, var)?;
        for lv in l_vars {
            if !local_vars.contains(&lv) {
                local_vars.push(lv);
            }
        }
    }

    cw.block_start("");
    cw.write_func_lvar(local_vars);
    cw.p("parg.ys = yarg->ys;");
    cw.nl();

    let mut first = true;
    for attr in shape.member_list(family) {
        let kw = if first { "if" } else { "else if" };
        first = false;

        cw.block_start(&format!("{} (!strcmp(sel, \"{}\"))", kw, attr.name));
        let (get_lines, init_lines, _) = attr.attr_get_parts(family, var)?;
        for line in &init_lines {
            cw.p(line);
        }
        for line in &get_lines {
            cw.p(line);
        }
        if attr.presence_type() == Presence::Present {
            cw.p(&format!("{}->_present.{} = 1;", var, attr.c_name));
        }
        cw.block_end("");
    }
    cw.p("return 0;");
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn parse_rsp_nested(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
) -> Result<(), String> {
    if shape.submsg.is_some() {
        return parse_rsp_submsg(family, ri, cw, shape);
    }

    parse_rsp_nested_prototype(family, cw, shape, "");

    let local_vars = vec![
        "const struct nlattr *attr;".to_string(),
        format!("{}dst = yarg->data;", shape.ptr_name),
    ];
    let init_lines = Vec::new();

    if !shape.members.is_empty() {
        multi_parse(family, ri, cw, shape, init_lines, local_vars)?;
    } else {
        // Empty nest.
        cw.block_start("");
        cw.p("return 0;");
        cw.block_end("");
        cw.nl();
    }
    Ok(())
}

fn parse_rsp_msg(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    deref: bool,
) -> Result<(), String> {
    if !ri.mode_has_reply(family) && ri.op_mode != Some(OpMode::Event) {
        return Ok(());
    }

    let func_args = vec![
        "const struct nlmsghdr *nlh".to_string(),
        "struct ynl_parse_arg *yarg".to_string(),
    ];

    let local_vars = vec![
        format!("{} *dst;", type_name(family, ri, Some(Direction::Reply), deref)),
        "const struct nlattr *attr;".to_string(),
    ];
    let init_lines = vec!["dst = yarg->data;".to_string()];

    cw.write_func_prot(
        "int",
        &format!(
            "{}_parse",
            op_prefix(family, ri, Some(Direction::Reply), deref)
        ),
        &func_args,
        None,
        "",
    );

    if !ri.reply().members.is_empty() {
        multi_parse(family, ri, cw, ri.reply(), init_lines, local_vars)?;
    } else {
        // Empty reply.
        cw.block_start("");
        cw.p("return YNL_PARSE_CB_OK;");
        cw.block_end("");
        cw.nl();
    }
    Ok(())
}

fn print_req(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    let op = ri.op(family).unwrap();
    let direction = Direction::Request;
    let mut ret_ok = "0".to_string();
    let mut ret_err = "-1";
    let mut local_vars = vec![
        "struct ynl_req_state yrs = { .yarg = { .ys = ys, }, };".to_string(),
        "struct nlmsghdr *nlh;".to_string(),
        "int err;".to_string(),
    ];

    let has_reply = ri.mode_has_reply(family);
    if has_reply {
        ret_ok = "rsp".to_string();
        ret_err = "NULL";
        local_vars.push(format!(
            "{} *rsp;",
            type_name(family, ri, Some(direction.other()), false)
        ));
    }

    if ri.request().fixed_header.is_some() {
        local_vars.push("size_t hdr_len;".to_string());
        local_vars.push("void *hdr;".to_string());
    }

    if ri
        .request()
        .member_list(family)
        .iter()
        .any(|a| a.attr_type == "indexed-array")
    {
        local_vars.push("struct nlattr *array;".to_string());
    }
    for attr in ri.request().member_list(family) {
        if attr.presence_type() == Presence::Count {
            local_vars.push("unsigned int i;".to_string());
            break;
        }
    }

    print_prototype(family, ri, cw, direction, false, None);
    cw.block_start("");
    cw.write_func_lvar(local_vars);

    if family.is_classic() {
        cw.p(&format!(
            "nlh = ynl_msg_start_req(ys, {}, req->_nlmsg_flags);",
            op.enum_name
        ));
    } else {
        cw.p(&format!(
            "nlh = ynl_gemsg_start_req(ys, ys->family_id, {}, 1);",
            op.enum_name
        ));
    }

    cw.p(&format!(
        "ys->req_policy = &{}_nest;",
        ri.request().render_name
    ));
    cw.p(&format!("ys->req_hdr_len = {};", ri.fixed_hdr_len));
    if has_reply {
        cw.p(&format!(
            "yrs.yarg.rsp_policy = &{}_nest;",
            ri.reply().render_name
        ));
    }
    cw.nl();

    if ri.request().fixed_header.is_some() {
        cw.p("hdr_len = sizeof(req->_hdr);");
        cw.p("hdr = ynl_nlmsg_put_extra_header(nlh, hdr_len);");
        cw.p("memcpy(hdr, &req->_hdr, hdr_len);");
        cw.nl();
    }

    for attr in ri.request().member_list(family) {
        attr.attr_put(family, ri, cw, "req")?;
    }
    cw.nl();

    if has_reply {
        cw.p("rsp = calloc(1, sizeof(*rsp));");
        cw.p("yrs.yarg.data = rsp;");
        cw.p(&format!(
            "yrs.cb = {}_parse;",
            op_prefix(family, ri, Some(Direction::Reply), false)
        ));
        if op.value().is_some() {
            cw.p(&format!("yrs.rsp_cmd = {};", op.enum_name));
        } else {
            cw.p(&format!("yrs.rsp_cmd = {};", op.rsp_value.unwrap_or(0)));
        }
        cw.nl();
    }
    cw.p("err = ynl_exec(ys, nlh, &yrs);");
    cw.p("if (err < 0)");
    if has_reply {
        cw.p("goto err_free;");
    } else {
        cw.p("return -1;");
    }
    cw.nl();

    cw.p(&format!("return {};", ret_ok));
    cw.nl();

    if has_reply {
        cw.p("err_free:");
        cw.p(&call_free(family, ri, direction.other(), "rsp"));
        cw.p(&format!("return {};", ret_err));
    }

    cw.block_end("");
    Ok(())
}

fn print_dump(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    let op = ri.op(family).unwrap();
    let direction = Direction::Request;
    print_prototype(family, ri, cw, direction, false, None);
    cw.block_start("");
    let mut local_vars = vec![
        "struct ynl_dump_state yds = {};".to_string(),
        "struct nlmsghdr *nlh;".to_string(),
        "int err;".to_string(),
    ];

    if ri.request().fixed_header.is_some() {
        local_vars.push("size_t hdr_len;".to_string());
        local_vars.push("void *hdr;".to_string());
    }

    if ri.mode_has_request(family) {
        if ri
            .request()
            .member_list(family)
            .iter()
            .any(|a| a.attr_type == "indexed-array")
        {
            local_vars.push("struct nlattr *array;".to_string());
        }
        for attr in ri.request().member_list(family) {
            if attr.presence_type() == Presence::Count {
                local_vars.push("unsigned int i;".to_string());
                break;
            }
        }
    }

    cw.write_func_lvar(local_vars);

    cw.p("yds.yarg.ys = ys;");
    cw.p(&format!(
        "yds.yarg.rsp_policy = &{}_nest;",
        ri.reply().render_name
    ));
    cw.p("yds.yarg.data = NULL;");
    cw.p(&format!(
        "yds.alloc_sz = sizeof({});",
        type_name(family, ri, Some(direction.other()), false)
    ));
    cw.p(&format!(
        "yds.cb = {}_parse;",
        op_prefix(family, ri, Some(Direction::Reply), true)
    ));
    if op.value().is_some() {
        cw.p(&format!("yds.rsp_cmd = {};", op.enum_name));
    } else {
        cw.p(&format!("yds.rsp_cmd = {};", op.rsp_value.unwrap_or(0)));
    }
    cw.nl();
    if family.is_classic() {
        cw.p(&format!("nlh = ynl_msg_start_dump(ys, {});", op.enum_name));
    } else {
        cw.p(&format!(
            "nlh = ynl_gemsg_start_dump(ys, ys->family_id, {}, 1);",
            op.enum_name
        ));
    }

    if ri.request().fixed_header.is_some() {
        cw.p("hdr_len = sizeof(req->_hdr);");
        cw.p("hdr = ynl_nlmsg_put_extra_header(nlh, hdr_len);");
        cw.p("memcpy(hdr, &req->_hdr, hdr_len);");
        cw.nl();
    }

    if ri.mode_has_request(family) {
        cw.p(&format!(
            "ys->req_policy = &{}_nest;",
            ri.request().render_name
        ));
        cw.p(&format!("ys->req_hdr_len = {};", ri.fixed_hdr_len));
        cw.nl();
        for attr in ri.request().member_list(family) {
            attr.attr_put(family, ri, cw, "req")?;
        }
    }
    cw.nl();

    cw.p("err = ynl_exec_dump(ys, nlh, &yds);");
    cw.p("if (err < 0)");
    cw.p("goto free_list;");
    cw.nl();

    cw.p("return yds.first;");
    cw.nl();
    cw.p("free_list:");
    cw.p(&call_free(family, ri, direction.other(), "yds.first"));
    cw.p("return NULL;");
    cw.block_end("");
    Ok(())
}

fn print_alloc_wrapper(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Option<Direction>,
    shape: Option<&StructShape>,
) {
    let name = op_prefix(family, ri, direction, false);
    let mut struct_name = name.clone();
    if ri.type_name_conflict {
        struct_name.push('_');
    }

    let mut args = vec!["void".to_string()];
    let mut cnt = "1";
    if shape.is_some_and(|s| s.in_multi_val) {
        args = vec!["unsigned int n".to_string()];
        cnt = "n";
    }

    cw.write_func_prot(
        &format!("static inline struct {} *", struct_name),
        &format!("{}_alloc", name),
        &args,
        None,
        "",
    );
    cw.block_start("");
    cw.p(&format!("return calloc({}, sizeof(struct {}));", cnt, struct_name));
    cw.block_end("");
}

fn print_free_prototype(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Option<Direction>,
    suffix: &str,
) {
    let name = op_prefix(family, ri, direction, false);
    let mut struct_name = name.clone();
    if ri.type_name_conflict {
        struct_name.push('_');
    }
    let arg = free_arg_name(direction);
    cw.write_func_prot(
        "void",
        &format!("{}_free", name),
        &[format!("struct {} *{}", struct_name, arg)],
        None,
        suffix,
    );
}

fn print_nlflags_set(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter, direction: Direction) {
    let name = op_prefix(family, ri, Some(direction), false);
    cw.write_func_prot(
        "static inline void",
        &format!("{}_set_nlflags", name),
        &[format!("struct {} *req", name), "__u16 nl_flags".to_string()],
        None,
        "",
    );
    cw.block_start("");
    cw.p("req->_nlmsg_flags = nl_flags;");
    cw.block_end("");
    cw.nl();
}

fn print_type_inner(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Option<Direction>,
    shape: &StructShape,
) -> Result<(), String> {
    let mut suffix = format!(
        "_{}{}",
        ri.type_name,
        crate::shape::dir_suffix(direction)
    );
    if direction.is_none() && ri.type_name_conflict {
        suffix.push('_');
    }

    if ri.op_mode == Some(OpMode::Dump) && !ri.type_oneside {
        suffix.push_str("_dump");
    }

    cw.block_start(&format!("struct {}{}", family.c_name, suffix));

    if ri.needs_nlflags(family, direction) {
        cw.p("__u16 _nlmsg_flags;");
        cw.nl();
    }
    if let Some(fixed_header) = &shape.fixed_header {
        cw.p(&format!("{} _hdr;", fixed_header));
        cw.nl();
    }

    for type_filter in [Presence::Present, Presence::Len, Presence::Count] {
        let mut meta_started = false;
        for attr in shape.member_list(family) {
            if let Some(line) = attr.presence_member(ri.ku_space, type_filter) {
                if !meta_started {
                    cw.block_start("struct");
                    meta_started = true;
                }
                cw.p(&line);
            }
        }
        if meta_started {
            cw.block_end(&format!("_{};", type_filter.tag()));
        }
    }
    cw.nl();

    for arg in &shape.inherited {
        cw.p(&format!("__u32 {};", arg));
    }

    for attr in shape.member_list(family) {
        attr.struct_member(family, ri, cw)?;
    }

    cw.block_end(";");
    cw.nl();
    Ok(())
}

fn print_type(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Direction,
) -> Result<(), String> {
    let shape = match direction {
        Direction::Request => ri.request().clone(),
        Direction::Reply => ri.reply().clone(),
    };
    print_type_inner(family, ri, cw, Some(direction), &shape)
}

fn print_type_full(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
) -> Result<(), String> {
    print_type_inner(family, ri, cw, None, shape)?;

    if shape.request && shape.in_multi_val {
        print_alloc_wrapper(family, ri, cw, None, Some(shape));
        cw.nl();
        print_free_prototype(family, ri, cw, None, ";");
        cw.nl();

        // Name conflicts are rare and painful to thread through the
        // setter naming; skip setters for those types.
        if ri.ku_space == Space::User && !ri.type_name_conflict {
            for attr in shape.member_list(family) {
                attr.setter(family, ri, cw, None, false, &[], "obj")?;
            }
        }
        cw.nl();
    }
    Ok(())
}

fn print_type_helpers(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Direction,
    deref: bool,
) -> Result<(), String> {
    print_free_prototype(family, ri, cw, Some(direction), ";");
    cw.nl();

    if ri.needs_nlflags(family, Some(direction)) {
        print_nlflags_set(family, ri, cw, direction);
    }

    if ri.ku_space == Space::User && direction == Direction::Request {
        for attr in ri.request().member_list(family) {
            attr.setter(family, ri, cw, Some(direction), deref, &[], "req")?;
        }
    }
    cw.nl();
    Ok(())
}

fn print_req_type_helpers(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
) -> Result<(), String> {
    if ri.type_empty(ri.request()) {
        return Ok(());
    }
    print_alloc_wrapper(family, ri, cw, Some(Direction::Request), None);
    print_type_helpers(family, ri, cw, Direction::Request, false)
}

fn print_rsp_type_helpers(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
) -> Result<(), String> {
    if !ri.mode_has_reply(family) {
        return Ok(());
    }
    print_type_helpers(family, ri, cw, Direction::Reply, false)
}

fn print_req_type(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    if ri.type_empty(ri.request()) {
        return Ok(());
    }
    print_type(family, ri, cw, Direction::Request)
}

fn print_rsp_type(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    match ri.op_mode {
        Some(OpMode::Do) | Some(OpMode::Dump) => {
            if !ri.mode_has_reply(family) {
                return Ok(());
            }
        }
        Some(OpMode::Event) => {}
        _ => return Ok(()),
    }
    print_type(family, ri, cw, Direction::Reply)
}

fn print_wrapped_type(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) {
    cw.block_start(&type_name(family, ri, Some(Direction::Reply), false));
    if ri.op_mode == Some(OpMode::Dump) {
        cw.p(&format!(
            "{} *next;",
            type_name(family, ri, Some(Direction::Reply), false)
        ));
    } else if ri.op_mode == Some(OpMode::Notify) || ri.op_mode == Some(OpMode::Event) {
        cw.p("__u16 family;");
        cw.p("__u8 cmd;");
        cw.p("struct ynl_ntf_base_type *next;");
        cw.p(&format!(
            "void (*free)({} *ntf);",
            type_name(family, ri, Some(Direction::Reply), false)
        ));
    }
    cw.p(&format!(
        "{} obj __attribute__((aligned(8)));",
        type_name(family, ri, Some(Direction::Reply), true)
    ));
    cw.block_end(";");
    cw.nl();
    print_free_prototype(family, ri, cw, Some(Direction::Reply), ";");
    cw.nl();
}

fn free_type_members_iter(family: &Family, cw: &mut CodeWriter, shape: &StructShape) {
    if shape.free_needs_iter(family) {
        cw.p("unsigned int i;");
        cw.nl();
    }
}

fn free_type_members(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    var: &str,
    shape: &StructShape,
    ref_: &str,
) -> Result<(), String> {
    for attr in shape.member_list(family) {
        attr.emit_free(family, ri, cw, var, ref_)?;
    }
    Ok(())
}

fn free_type(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    direction: Option<Direction>,
    shape: &StructShape,
) -> Result<(), String> {
    let var = free_arg_name(direction);

    print_free_prototype(family, ri, cw, direction, "");
    cw.block_start("");
    free_type_members_iter(family, cw, shape);
    free_type_members(family, ri, cw, var, shape, "")?;
    if direction.is_some() {
        cw.p(&format!("free({});", var));
    }
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn free_rsp_nested_prototype(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) {
    print_free_prototype(family, ri, cw, None, ";");
}

fn free_rsp_nested(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    shape: &StructShape,
) -> Result<(), String> {
    free_type(family, ri, cw, None, shape)
}

fn print_req_free(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    if !ri.mode_has_request(family) {
        return Ok(());
    }
    free_type(family, ri, cw, Some(Direction::Request), &ri.request().clone())
}

fn print_rsp_free(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    if !ri.mode_has_reply(family) {
        return Ok(());
    }
    free_type(family, ri, cw, Some(Direction::Reply), &ri.reply().clone())
}

fn print_dump_type_free(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    let sub_type = type_name(family, ri, Some(Direction::Reply), false);

    print_free_prototype(family, ri, cw, Some(Direction::Reply), "");
    cw.block_start("");
    cw.p(&format!("{} *next = rsp;", sub_type));
    cw.nl();
    cw.block_start("while ((void *)next != YNL_LIST_END)");
    free_type_members_iter(family, cw, ri.reply());
    cw.p("rsp = next;");
    cw.p("next = rsp->next;");
    cw.nl();

    free_type_members(family, ri, cw, "rsp", &ri.reply().clone(), "obj.")?;
    cw.p("free(rsp);");
    cw.block_end("");
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn print_ntf_type_free(family: &Family, ri: &RenderInfo, cw: &mut CodeWriter) -> Result<(), String> {
    print_free_prototype(family, ri, cw, Some(Direction::Reply), "");
    cw.block_start("");
    free_type_members_iter(family, cw, ri.reply());
    free_type_members(family, ri, cw, "rsp", &ri.reply().clone(), "obj.")?;
    cw.p("free(rsp);");
    cw.block_end("");
    cw.nl();
    Ok(())
}

fn render_user_ntf_entry(
    family: &Family,
    ri: &RenderInfo,
    cw: &mut CodeWriter,
    op_name: &str,
) -> Result<(), String> {
    let op = family.op(op_name);
    if !family.is_classic() {
        cw.block_start(&format!("[{}] = ", op.enum_name));
    } else {
        let rsp_value = op
            .rsp_value
            .ok_or_else(|| format!("notification '{}' has no reply value", op.name))?;
        let crud_name = family
            .req_by_value
            .get(&rsp_value)
            .ok_or_else(|| format!("no request op with value {}", rsp_value))?;
        let crud_op = family.op(crud_name);
        cw.block_start(&format!("[{}] = ", crud_op.enum_name));
    }
    cw.p(&format!(
        ".alloc_sz\t= sizeof({}),",
        type_name(family, ri, Some(Direction::Reply), false)
    ));
    cw.p(&format!(
        ".cb\t\t= {}_parse,",
        op_prefix(family, ri, Some(Direction::Reply), true)
    ));
    cw.p(&format!(".policy\t\t= &{}_nest,", ri.reply().render_name));
    cw.p(&format!(
        ".free\t\t= (void *){}_free,",
        op_prefix(family, ri, Some(Direction::Reply), false)
    ));
    cw.block_end(",");
    Ok(())
}

pub fn render_user_family(
    family: &Family,
    cw: &mut CodeWriter,
    prototype: bool,
) -> Result<(), String> {
    let symbol = format!("const struct ynl_family ynl_{}_family", family.c_name);
    if prototype {
        cw.p(&format!("extern {};", symbol));
        return Ok(());
    }

    if family.has_ntfs() {
        cw.block_start(&format!(
            "static const struct ynl_ntf_info {}_ntf_info[] = ",
            family.c_name
        ));
        let ntf_names: Vec<String> = family.ntfs.clone();
        for ntf_name in &ntf_names {
            let ntf_op = family.op(ntf_name);
            let ri = if let Some(target) = ntf_op.spec.notify.clone() {
                let op = family.op(&target);
                RenderInfo::for_op(family, Space::User, op, OpMode::Notify)?
            } else if ntf_op.has_mode(OpMode::Event) {
                RenderInfo::for_op(family, Space::User, ntf_op, OpMode::Event)?
            } else {
                return Err(format!("Invalid notification {}", ntf_name));
            };
            render_user_ntf_entry(family, &ri, cw, ntf_name)?;
        }
        cw.block_end(";");
        cw.nl();
    }

    cw.block_start(&format!("{} = ", symbol));
    cw.p(&format!(".name\t\t= \"{}\",", family.c_name));
    if family.is_classic() {
        cw.p(".is_classic\t= true,");
        cw.p(&format!(
            ".classic_id\t= {},",
            family.raw.protonum.unwrap_or(0)
        ));
    }
    if family.is_classic() {
        if let Some(fixed_header) = &family.fixed_header {
            cw.p(&format!(
                ".hdr_len\t= sizeof(struct {}),",
                c_lower(fixed_header)
            ));
        }
    } else if let Some(fixed_header) = &family.fixed_header {
        cw.p(&format!(
            ".hdr_len\t= sizeof(struct genlmsghdr) + sizeof(struct {}),",
            c_lower(fixed_header)
        ));
    } else {
        cw.p(".hdr_len\t= sizeof(struct genlmsghdr),");
    }
    if family.has_ntfs() {
        cw.p(&format!(".ntf_info\t= {}_ntf_info,", family.c_name));
        cw.p(&format!(
            ".ntf_info_size\t= YNL_ARRAY_SIZE({}_ntf_info),",
            family.c_name
        ));
    }
    cw.block_end(";");
    Ok(())
}

/// Body of the user-space header.
pub fn render_header(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    cw.p("/* Enums */");
    put_op_name_fwd(family, cw);

    for c in family.consts.values() {
        if let Some(enum_set) = &c.enum_set {
            put_enum_to_str_fwd(cw, enum_set);
        }
    }
    cw.nl();

    cw.p("/* Common nested types */");
    let pure: Vec<(String, StructShape)> = family
        .pure_nested_structs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (attr_set, shape) in &pure {
        let ri = RenderInfo::for_set(family, Space::User, attr_set)?;
        print_type_full(family, &ri, cw, shape)?;
    }

    for op_name in &family.ops {
        let op = family.op(op_name);
        cw.p(&format!("/* ============== {} ============== */", op.enum_name));

        if op.has_mode(OpMode::Do) && !op.has_mode(OpMode::Event) {
            cw.p(&format!("/* {} - do */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Do)?;
            print_req_type(family, &ri, cw)?;
            print_req_type_helpers(family, &ri, cw)?;
            cw.nl();
            print_rsp_type(family, &ri, cw)?;
            print_rsp_type_helpers(family, &ri, cw)?;
            cw.nl();
            print_req_prototype(family, &ri, cw);
            cw.nl();
        }

        if op.has_mode(OpMode::Dump) {
            cw.p(&format!("/* {} - dump */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Dump)?;
            print_req_type(family, &ri, cw)?;
            print_req_type_helpers(family, &ri, cw)?;
            if !ri.type_consistent || ri.type_oneside {
                print_rsp_type(family, &ri, cw)?;
            }
            print_wrapped_type(family, &ri, cw);
            print_dump_prototype(family, &ri, cw);
            cw.nl();
        }

        if op.has_ntf {
            cw.p(&format!("/* {} - notify */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Notify)?;
            if !ri.type_consistent {
                return Err(format!(
                    "Only notifications with consistent types supported ({})",
                    op.name
                ));
            }
            print_wrapped_type(family, &ri, cw);
        }
    }

    for ntf_name in &family.ntfs {
        let op = family.op(ntf_name);
        if op.has_mode(OpMode::Event) {
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Event)?;
            cw.p(&format!("/* {} - event */", op.enum_name));
            print_rsp_type(family, &ri, cw)?;
            cw.nl();
            print_wrapped_type(family, &ri, cw);
        }
    }
    cw.nl();
    Ok(())
}

/// Body of the user-space source.
pub fn render_source(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    cw.p("/* Enums */");
    put_op_name(family, cw);

    for c in family.consts.values() {
        if let Some(enum_set) = &c.enum_set {
            put_enum_to_str(cw, enum_set);
        }
    }
    cw.nl();

    let pure: Vec<(String, StructShape)> = family
        .pure_nested_structs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut has_recursive_nests = false;
    cw.p("/* Policies */");
    for (_, shape) in &pure {
        if shape.recursive {
            put_typol_fwd(cw, shape);
            has_recursive_nests = true;
        }
    }
    if has_recursive_nests {
        cw.nl();
    }
    for (_, shape) in &pure {
        put_typol(family, cw, shape)?;
    }
    for name in family.root_sets.keys() {
        let shape = StructShape::new(family, name, None, None, None, None)?;
        put_typol(family, cw, &shape)?;
    }

    cw.p("/* Common nested types */");
    if has_recursive_nests {
        for (attr_set, shape) in &pure {
            let ri = RenderInfo::for_set(family, Space::User, attr_set)?;
            free_rsp_nested_prototype(family, &ri, cw);
            if shape.request {
                put_req_nested_prototype(cw, shape, ";");
            }
            if shape.reply {
                parse_rsp_nested_prototype(family, cw, shape, ";");
            }
        }
        cw.nl();
    }
    for (attr_set, shape) in &pure {
        let ri = RenderInfo::for_set(family, Space::User, attr_set)?;

        free_rsp_nested(family, &ri, cw, shape)?;
        if shape.request {
            put_req_nested(family, &ri, cw, shape)?;
        }
        if shape.reply {
            parse_rsp_nested(family, &ri, cw, shape)?;
        }
    }

    for op_name in &family.ops {
        let op = family.op(op_name);
        cw.p(&format!("/* ============== {} ============== */", op.enum_name));
        if op.has_mode(OpMode::Do) && !op.has_mode(OpMode::Event) {
            cw.p(&format!("/* {} - do */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Do)?;
            print_req_free(family, &ri, cw)?;
            print_rsp_free(family, &ri, cw)?;
            parse_rsp_msg(family, &ri, cw, false)?;
            print_req(family, &ri, cw)?;
            cw.nl();
        }

        if op.has_mode(OpMode::Dump) {
            cw.p(&format!("/* {} - dump */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Dump)?;
            if !ri.type_consistent || ri.type_oneside {
                parse_rsp_msg(family, &ri, cw, true)?;
            }
            print_req_free(family, &ri, cw)?;
            print_dump_type_free(family, &ri, cw)?;
            print_dump(family, &ri, cw)?;
            cw.nl();
        }

        if op.has_ntf {
            cw.p(&format!("/* {} - notify */", op.enum_name));
            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Notify)?;
            if !ri.type_consistent {
                return Err(format!(
                    "Only notifications with consistent types supported ({})",
                    op.name
                ));
            }
            print_ntf_type_free(family, &ri, cw)?;
        }
    }

    for ntf_name in &family.ntfs {
        let op = family.op(ntf_name);
        if op.has_mode(OpMode::Event) {
            cw.p(&format!("/* {} - event */", op.enum_name));

            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Do)?;
            parse_rsp_msg(family, &ri, cw, false)?;

            let ri = RenderInfo::for_op(family, Space::User, op, OpMode::Event)?;
            print_ntf_type_free(family, &ri, cw)?;
        }
    }
    cw.nl();
    render_user_family(family, cw, false)
}
