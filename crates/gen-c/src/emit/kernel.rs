//! Kernel-side output: policy tables, range/validate helpers, the op
//! table, multicast groups and the family struct.

use crate::ir::{Family, LimitKind, OpMode};
use crate::names::{c_lower, c_upper};
use crate::shape::{RenderInfo, Space, StructShape};
use crate::writer::CodeWriter;

pub fn kernel_can_gen_family_struct(family: &Family) -> bool {
    family.proto == "genetlink"
}

fn policy_should_be_static(family: &Family) -> bool {
    family.kernel_policy == "split" || kernel_can_gen_family_struct(family)
}

fn policy_name(family: &Family, shape: &StructShape, ri: Option<&RenderInfo>) -> String {
    match ri.and_then(|ri| ri.op(family)) {
        Some(op) => {
            let mut name = op.render_name.clone();
            if op.dual_policy {
                if let Some(mode) = ri.and_then(|ri| ri.op_mode) {
                    name.push_str(&format!("_{}", mode.key()));
                }
            }
            name
        }
        None => shape.render_name.clone(),
    }
}

pub fn print_req_policy_fwd(
    family: &Family,
    cw: &mut CodeWriter,
    shape: &StructShape,
    ri: Option<&RenderInfo>,
    terminate: bool,
) -> Result<(), String> {
    if terminate && ri.is_some() && policy_should_be_static(family) {
        return Ok(());
    }

    let prefix = if terminate {
        "extern "
    } else if ri.is_some() && policy_should_be_static(family) {
        "static "
    } else {
        ""
    };
    let suffix = if terminate { ";" } else { " = {" };

    let max_attr = shape
        .attr_max(family)
        .ok_or_else(|| format!("attribute set '{}' has no attributes", shape.space_name))?;
    let name = policy_name(family, shape, ri);
    cw.p(&format!(
        "{}const struct nla_policy {}_nl_policy[{} + 1]{}",
        prefix, name, max_attr.enum_name, suffix
    ));
    Ok(())
}

pub fn print_req_policy(
    family: &Family,
    cw: &mut CodeWriter,
    shape: &StructShape,
    ri: Option<&RenderInfo>,
) -> Result<(), String> {
    if let Some(op) = ri.and_then(|ri| ri.op(family)) {
        cw.ifdef_block(op.spec.config_cond.as_deref());
    }
    print_req_policy_fwd(family, cw, shape, ri, false)?;
    for attr in shape.member_list(family) {
        attr.attr_policy(family, cw)?;
    }
    cw.p("};");
    cw.ifdef_block(None);
    cw.nl();
    Ok(())
}

fn print_kernel_policy_ranges(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    let mut first = true;
    for attr_set in family.attr_sets.values() {
        if attr_set.subset_of.is_some() {
            continue;
        }

        for attr in attr_set.attrs.values() {
            if !attr.request || !attr.checks.full_range {
                continue;
            }

            if first {
                cw.p("/* Integer value ranges */");
                first = false;
            }

            let sign = if attr.attr_type.starts_with('u') {
                ""
            } else {
                "_signed"
            };
            let suffix = if attr.attr_type.starts_with('u') {
                "ULL"
            } else {
                "LL"
            };
            cw.block_start(&format!(
                "static const struct netlink_range_validation{} {}_range =",
                sign,
                c_lower(&attr.enum_name)
            ));
            let mut members = Vec::new();
            if attr.checks.min.is_some() {
                members.push((
                    "min".to_string(),
                    attr.get_limit_str(family, LimitKind::Min, suffix)?,
                ));
            }
            if attr.checks.max.is_some() {
                members.push((
                    "max".to_string(),
                    attr.get_limit_str(family, LimitKind::Max, suffix)?,
                ));
            }
            cw.write_struct_init(&members);
            cw.block_end(";");
            cw.nl();
        }
    }
    Ok(())
}

fn print_kernel_policy_sparse_enum_validates(
    family: &Family,
    cw: &mut CodeWriter,
) -> Result<(), String> {
    let mut first = true;
    for attr_set in family.attr_sets.values() {
        if attr_set.subset_of.is_some() {
            continue;
        }

        for attr in attr_set.attrs.values() {
            if !attr.request || !attr.checks.sparse {
                continue;
            }

            if first {
                cw.p("/* Sparse enums validation callbacks */");
                first = false;
            }

            cw.write_func_prot(
                "static int",
                &format!("{}_validate", c_lower(&attr.enum_name)),
                &[
                    "const struct nlattr *attr".to_string(),
                    "struct netlink_ext_ack *extack".to_string(),
                ],
                None,
                "",
            );
            cw.block_start("");
            cw.block_start(&format!("switch (nla_get_{}(attr))", attr.attr_type));
            let enum_name = attr
                .enum_ref
                .as_ref()
                .ok_or_else(|| format!("sparse check without enum on '{}'", attr.name))?;
            let enum_set = family.consts[enum_name]
                .enum_set
                .as_ref()
                .ok_or_else(|| format!("'{}' is not an enum", enum_name))?;
            let mut first_entry = true;
            for entry in enum_set.entries.values() {
                if first_entry {
                    first_entry = false;
                } else {
                    cw.p("fallthrough;");
                }
                cw.p(&format!("case {}:", entry.c_name));
            }
            cw.p("return 0;");
            cw.block_end("");
            cw.p("NL_SET_ERR_MSG_ATTR(extack, attr, \"invalid enum value\");");
            cw.p("return -EINVAL;");
            cw.block_end("");
            cw.nl();
        }
    }
    Ok(())
}

fn print_kernel_op_table_fwd(family: &Family, cw: &mut CodeWriter, terminate: bool) {
    let exported = !kernel_can_gen_family_struct(family);

    if !terminate || exported {
        cw.p(&format!("/* Ops table for {} */", family.ident_name));

        let struct_type = match family.kernel_policy.as_str() {
            "global" => "genl_small_ops",
            "per-op" => "genl_ops",
            _ => "genl_split_ops",
        };

        let cnt = if !exported {
            String::new()
        } else if family.kernel_policy == "split" {
            let mut n = 0;
            for op in family.ops_iter() {
                if op.has_mode(OpMode::Do) {
                    n += 1;
                }
                if op.has_mode(OpMode::Dump) {
                    n += 1;
                }
            }
            n.to_string()
        } else {
            family.ops.len().to_string()
        };

        let qual = if !exported { "static const" } else { "const" };
        let line = format!(
            "{} struct {} {}_nl_ops[{}]",
            qual, struct_type, family.c_name, cnt
        );
        if terminate {
            cw.p(&format!("extern {};", line));
        } else {
            cw.block_start(&format!("{} =", line));
        }
    }

    if !terminate {
        return;
    }

    cw.nl();
    for name in &family.hooks.pre_do {
        cw.write_func_prot(
            "int",
            &c_lower(name),
            &[
                "const struct genl_split_ops *ops".to_string(),
                "struct sk_buff *skb".to_string(),
                "struct genl_info *info".to_string(),
            ],
            None,
            ";",
        );
    }
    for name in &family.hooks.post_do {
        cw.write_func_prot(
            "void",
            &c_lower(name),
            &[
                "const struct genl_split_ops *ops".to_string(),
                "struct sk_buff *skb".to_string(),
                "struct genl_info *info".to_string(),
            ],
            None,
            ";",
        );
    }
    for name in &family.hooks.pre_dump {
        cw.write_func_prot(
            "int",
            &c_lower(name),
            &["struct netlink_callback *cb".to_string()],
            None,
            ";",
        );
    }
    for name in &family.hooks.post_dump {
        cw.write_func_prot(
            "int",
            &c_lower(name),
            &["struct netlink_callback *cb".to_string()],
            None,
            ";",
        );
    }

    cw.nl();

    for op in family.ops_iter() {
        if op.has_mode(OpMode::Do) {
            let name = c_lower(&format!("{}-nl-{}-doit", family.ident_name, op.name));
            cw.write_func_prot(
                "int",
                &name,
                &[
                    "struct sk_buff *skb".to_string(),
                    "struct genl_info *info".to_string(),
                ],
                None,
                ";",
            );
        }

        if op.has_mode(OpMode::Dump) {
            let name = c_lower(&format!("{}-nl-{}-dumpit", family.ident_name, op.name));
            cw.write_func_prot(
                "int",
                &name,
                &[
                    "struct sk_buff *skb".to_string(),
                    "struct netlink_callback *cb".to_string(),
                ],
                None,
                ";",
            );
        }
    }
    cw.nl();
}

fn print_kernel_op_table_hdr(family: &Family, cw: &mut CodeWriter) {
    print_kernel_op_table_fwd(family, cw, true);
}

fn print_kernel_op_table(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    print_kernel_op_table_fwd(family, cw, false);
    if family.kernel_policy == "global" || family.kernel_policy == "per-op" {
        for op in family.ops_iter() {
            cw.ifdef_block(op.spec.config_cond.as_deref());
            cw.block_start("");
            let mut members = vec![("cmd".to_string(), op.enum_name.clone())];
            if !op.spec.dont_validate.is_empty() {
                let joined = op
                    .spec
                    .dont_validate
                    .iter()
                    .map(|x| c_upper(&format!("genl-dont-validate-{}", x)))
                    .collect::<Vec<_>>()
                    .join(" | ");
                members.push(("validate".to_string(), joined));
            }
            for mode in [OpMode::Do, OpMode::Dump] {
                if op.has_mode(mode) {
                    let name = c_lower(&format!(
                        "{}-nl-{}-{}it",
                        family.ident_name,
                        op.name,
                        mode.key()
                    ));
                    members.push((format!("{}it", mode.key()), name));
                }
            }
            if family.kernel_policy == "per-op" {
                let attr_set = op
                    .attribute_set
                    .as_deref()
                    .ok_or_else(|| format!("operation '{}' has no attribute-set", op.name))?;
                let req = op.request_of(OpMode::Do).ok_or_else(|| {
                    format!("per-op policy needs a do request on '{}'", op.name)
                })?;
                let shape =
                    StructShape::new(family, attr_set, Some(&req.attributes), None, None, None)?;

                let name = c_lower(&format!("{}-{}-nl-policy", family.ident_name, op.name));
                members.push(("policy".to_string(), name));
                let max_attr = shape.attr_max(family).ok_or_else(|| {
                    format!("empty request policy on '{}'", op.name)
                })?;
                members.push(("maxattr".to_string(), max_attr.enum_name.clone()));
            }
            if !op.spec.flags.is_empty() {
                let joined = op
                    .spec
                    .flags
                    .iter()
                    .map(|x| c_upper(&format!("genl-{}", x)))
                    .collect::<Vec<_>>()
                    .join(" | ");
                members.push(("flags".to_string(), joined));
            }
            cw.write_struct_init(&members);
            cw.block_end(",");
        }
    } else if family.kernel_policy == "split" {
        for op in family.ops_iter() {
            for mode in [OpMode::Do, OpMode::Dump] {
                if !op.has_mode(mode) {
                    continue;
                }

                cw.ifdef_block(op.spec.config_cond.as_deref());
                cw.block_start("");
                let mut members = vec![("cmd".to_string(), op.enum_name.clone())];
                if !op.spec.dont_validate.is_empty() {
                    let mut dont_validate = Vec::new();
                    for x in &op.spec.dont_validate {
                        if mode == OpMode::Do && (x == "dump" || x == "dump-strict") {
                            continue;
                        }
                        if mode == OpMode::Dump && x == "strict" {
                            continue;
                        }
                        dont_validate.push(x.clone());
                    }

                    if !dont_validate.is_empty() {
                        let joined = dont_validate
                            .iter()
                            .map(|x| c_upper(&format!("genl-dont-validate-{}", x)))
                            .collect::<Vec<_>>()
                            .join(" | ");
                        members.push(("validate".to_string(), joined));
                    }
                }
                let name = c_lower(&format!(
                    "{}-nl-{}-{}it",
                    family.ident_name,
                    op.name,
                    mode.key()
                ));
                let cb_pre = if mode == OpMode::Do { "pre_doit" } else { "start" };
                let cb_post = if mode == OpMode::Do { "post_doit" } else { "done" };
                let mode_spec = op.mode(mode).unwrap();
                if let Some(pre) = &mode_spec.pre {
                    members.push((cb_pre.to_string(), c_lower(pre)));
                }
                members.push((format!("{}it", mode.key()), name));
                if let Some(post) = &mode_spec.post {
                    members.push((cb_post.to_string(), c_lower(post)));
                }

                if let Some(req) = op.request_of(mode) {
                    let attr_set = op
                        .attribute_set
                        .as_deref()
                        .ok_or_else(|| format!("operation '{}' has no attribute-set", op.name))?;
                    let shape = StructShape::new(
                        family,
                        attr_set,
                        Some(&req.attributes),
                        None,
                        None,
                        None,
                    )?;

                    let name = if op.dual_policy {
                        c_lower(&format!(
                            "{}-{}-{}-nl-policy",
                            family.ident_name,
                            op.name,
                            mode.key()
                        ))
                    } else {
                        c_lower(&format!("{}-{}-nl-policy", family.ident_name, op.name))
                    };
                    members.push(("policy".to_string(), name));
                    let max_attr = shape.attr_max(family).ok_or_else(|| {
                        format!("empty request policy on '{}'", op.name)
                    })?;
                    members.push(("maxattr".to_string(), max_attr.enum_name.clone()));
                }
                let mut flags = op.spec.flags.clone();
                flags.push(format!("cmd-cap-{}", mode.key()));
                let joined = flags
                    .iter()
                    .map(|x| c_upper(&format!("genl-{}", x)))
                    .collect::<Vec<_>>()
                    .join(" | ");
                members.push(("flags".to_string(), joined));
                cw.write_struct_init(&members);
                cw.block_end(",");
            }
        }
    }
    cw.ifdef_block(None);

    cw.block_end(";");
    cw.nl();
    Ok(())
}

fn print_kernel_mcgrp_hdr(family: &Family, cw: &mut CodeWriter) {
    if family.mcast_groups.is_empty() {
        return;
    }

    cw.block_start("enum");
    for grp in &family.mcast_groups {
        let grp_id = c_upper(&format!("{}-nlgrp-{},", family.ident_name, grp.name));
        cw.p(&grp_id);
    }
    cw.block_end(";");
    cw.nl();
}

fn print_kernel_mcgrp_src(family: &Family, cw: &mut CodeWriter) {
    if family.mcast_groups.is_empty() {
        return;
    }

    cw.block_start(&format!(
        "static const struct genl_multicast_group {}_nl_mcgrps[] =",
        family.c_name
    ));
    for grp in &family.mcast_groups {
        let grp_id = c_upper(&format!("{}-nlgrp-{}", family.ident_name, grp.name));
        cw.p(&format!("[{}] = {{ \"{}\", }},", grp_id, grp.name));
    }
    cw.block_end(";");
    cw.nl();
}

fn print_kernel_family_struct_hdr(family: &Family, cw: &mut CodeWriter) {
    if !kernel_can_gen_family_struct(family) {
        return;
    }

    cw.p(&format!(
        "extern struct genl_family {}_nl_family;",
        family.c_name
    ));
    cw.nl();
    if let Some(sock_priv) = &family.kernel_family.sock_priv {
        cw.p(&format!(
            "void {}_nl_sock_priv_init({} *priv);",
            family.c_name, sock_priv
        ));
        cw.p(&format!(
            "void {}_nl_sock_priv_destroy({} *priv);",
            family.c_name, sock_priv
        ));
        cw.nl();
    }
}

fn print_kernel_family_struct_src(family: &Family, cw: &mut CodeWriter) {
    if !kernel_can_gen_family_struct(family) {
        return;
    }

    if family.kernel_family.sock_priv.is_some() {
        // Indirect through fixed-signature trampolines to keep CFI happy.
        cw.write_func(
            "static void",
            &format!("__{}_nl_sock_priv_init", family.c_name),
            &[format!("{}_nl_sock_priv_init(priv);", family.c_name)],
            &["void *priv".to_string()],
            Vec::new(),
        );
        cw.nl();
        cw.write_func(
            "static void",
            &format!("__{}_nl_sock_priv_destroy", family.c_name),
            &[format!("{}_nl_sock_priv_destroy(priv);", family.c_name)],
            &["void *priv".to_string()],
            Vec::new(),
        );
        cw.nl();
    }

    cw.block_start(&format!(
        "struct genl_family {}_nl_family __ro_after_init =",
        family.ident_name
    ));
    cw.p(&format!(".name\t\t= {},", family.fam_key));
    cw.p(&format!(".version\t= {},", family.ver_key));
    cw.p(".netnsok\t= true,");
    cw.p(".parallel_ops\t= true,");
    cw.p(".module\t\t= THIS_MODULE,");
    if family.kernel_policy == "per-op" {
        cw.p(&format!(".ops\t\t= {}_nl_ops,", family.c_name));
        cw.p(&format!(".n_ops\t\t= ARRAY_SIZE({}_nl_ops),", family.c_name));
    } else if family.kernel_policy == "split" {
        cw.p(&format!(".split_ops\t= {}_nl_ops,", family.c_name));
        cw.p(&format!(
            ".n_split_ops\t= ARRAY_SIZE({}_nl_ops),",
            family.c_name
        ));
    }
    if !family.mcast_groups.is_empty() {
        cw.p(&format!(".mcgrps\t\t= {}_nl_mcgrps,", family.c_name));
        cw.p(&format!(
            ".n_mcgrps\t= ARRAY_SIZE({}_nl_mcgrps),",
            family.c_name
        ));
    }
    if let Some(sock_priv) = &family.kernel_family.sock_priv {
        cw.p(&format!(".sock_priv_size\t= sizeof({}),", sock_priv));
        cw.p(&format!(
            ".sock_priv_init\t= __{}_nl_sock_priv_init,",
            family.c_name
        ));
        cw.p(&format!(
            ".sock_priv_destroy = __{}_nl_sock_priv_destroy,",
            family.c_name
        ));
    }
    cw.block_end(";");
}

fn sorted_pure(family: &Family) -> Vec<(String, StructShape)> {
    let mut pure: Vec<(String, StructShape)> = family
        .pure_nested_structs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pure.sort_by(|a, b| a.0.cmp(&b.0));
    pure
}

fn global_policy_shape(family: &Family) -> Result<StructShape, String> {
    let set_name = family
        .global_policy_set
        .as_deref()
        .ok_or_else(|| "global policy without an attribute set".to_string())?;
    StructShape::new(
        family,
        set_name,
        Some(&family.global_policy),
        None,
        None,
        None,
    )
}

/// Body of the kernel header.
pub fn render_header(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    let pure = sorted_pure(family);
    if pure.iter().any(|(_, s)| s.request) {
        cw.p("/* Common nested types */");
    }
    for (_, shape) in &pure {
        if shape.request {
            print_req_policy_fwd(family, cw, shape, None, true)?;
        }
    }
    cw.nl();

    if family.kernel_policy == "global" {
        cw.p(&format!(
            "/* Global operation policy for {} */",
            family.name
        ));

        let shape = global_policy_shape(family)?;
        print_req_policy_fwd(family, cw, &shape, None, true)?;
        cw.nl();
    }

    if family.kernel_policy == "per-op" || family.kernel_policy == "split" {
        for op in family.ops_iter() {
            if op.has_mode(OpMode::Do) && !op.has_mode(OpMode::Event) {
                let ri = RenderInfo::for_op(family, Space::Kernel, op, OpMode::Do)?;
                print_req_policy_fwd(family, cw, ri.request(), Some(&ri), true)?;
                cw.nl();
            }
        }
    }

    print_kernel_op_table_hdr(family, cw);
    print_kernel_mcgrp_hdr(family, cw);
    print_kernel_family_struct_hdr(family, cw);
    Ok(())
}

/// Body of the kernel source.
pub fn render_source(family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
    print_kernel_policy_ranges(family, cw)?;
    print_kernel_policy_sparse_enum_validates(family, cw)?;

    let pure = sorted_pure(family);
    if pure.iter().any(|(_, s)| s.request) {
        cw.p("/* Common nested types */");
    }
    for (_, shape) in &pure {
        if shape.request {
            print_req_policy(family, cw, shape, None)?;
        }
    }
    cw.nl();

    if family.kernel_policy == "global" {
        cw.p(&format!(
            "/* Global operation policy for {} */",
            family.name
        ));

        let shape = global_policy_shape(family)?;
        print_req_policy(family, cw, &shape, None)?;
        cw.nl();
    }

    if family.kernel_policy == "per-op" || family.kernel_policy == "split" {
        for op in family.ops_iter() {
            for mode in [OpMode::Do, OpMode::Dump] {
                if op.has_mode(mode) && op.request_of(mode).is_some() {
                    cw.p(&format!("/* {} - {} */", op.enum_name, mode.key()));
                    let ri = RenderInfo::for_op(family, Space::Kernel, op, mode)?;
                    print_req_policy(family, cw, ri.request(), Some(&ri))?;
                    cw.nl();
                }
            }
        }
    }

    print_kernel_op_table(family, cw)?;
    print_kernel_mcgrp_src(family, cw);
    print_kernel_family_struct_src(family, cw);
    Ok(())
}
