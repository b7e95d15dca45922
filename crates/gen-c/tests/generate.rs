//! End-to-end tests: full YAML specs in, generated C out.

use std::fs;

use ynl_gen_c::{generate, GenOptions, Mode};

const LICENSE: &str = "# SPDX-License-Identifier: ((GPL-2.0 WITH Linux-syscall-note) OR BSD-3-Clause)\n";

fn gen_with(mode: Mode, header: bool, yaml: &str, exclude: &[&str]) -> String {
    let dir = tempfile::tempdir().unwrap();
    let spec = dir.path().join("family.yaml");
    fs::write(&spec, format!("{}{}", LICENSE, yaml)).unwrap();
    let out = dir.path().join("out.c");

    let opts = GenOptions {
        mode,
        header,
        spec,
        out_file: Some(out.clone()),
        cmp_out: false,
        user_headers: Vec::new(),
        exclude_ops: exclude.iter().map(|s| s.to_string()).collect(),
    };
    generate(&opts).unwrap();
    fs::read_to_string(&out).unwrap()
}

fn r#gen(mode: Mode, header: bool, yaml: &str) -> String {
    gen_with(mode, header, yaml, &[])
}

const SPLIT_FAMILY: &str = "\
name: ethtool
kernel-policy: split
attribute-sets:
  -
    name: header
    attributes:
      -
        name: dev-index
        type: u32
      -
        name: dev-name
        type: string
  -
    name: strset
    attributes:
      -
        name: header
        type: nest
        nested-attributes: header
      -
        name: counts-only
        type: flag
operations:
  list:
    -
      name: strset-get
      attribute-set: strset
      do:
        request:
          attributes:
            - header
        reply:
          attributes:
            - header
      dump:
        request:
          attributes:
            - header
            - counts-only
        reply:
          attributes:
            - header
";

#[test]
fn split_policy_emits_do_and_dump_tables() {
    let out = r#gen(Mode::Kernel, false, SPLIT_FAMILY);
    assert!(out.contains("static const struct nla_policy ethtool_strset_get_do_nl_policy[ETHTOOL_A_STRSET_HEADER + 1] = {"));
    assert!(out.contains("static const struct nla_policy ethtool_strset_get_dump_nl_policy[ETHTOOL_A_STRSET_COUNTS_ONLY + 1] = {"));
    assert!(out.contains(".policy\t\t= ethtool_strset_get_do_nl_policy,"));
    assert!(out.contains(".policy\t\t= ethtool_strset_get_dump_nl_policy,"));
    assert!(out.contains("GENL_CMD_CAP_DO"));
    assert!(out.contains("GENL_CMD_CAP_DUMP"));
    assert!(out.contains("[ETHTOOL_A_STRSET_HEADER] = NLA_POLICY_NESTED(ethtool_header_nl_policy),"));
}

#[test]
fn split_ops_table_uses_split_ops_struct() {
    let out = r#gen(Mode::Kernel, false, SPLIT_FAMILY);
    assert!(out.contains("static const struct genl_split_ops ethtool_nl_ops[] = {"));
    assert!(out.contains(".doit\t\t= ethtool_nl_strset_get_doit,"));
    assert!(out.contains(".dumpit\t\t= ethtool_nl_strset_get_dumpit,"));
}

#[test]
fn kernel_header_declares_doit_dumpit() {
    let out = r#gen(Mode::Kernel, true, SPLIT_FAMILY);
    assert!(out.contains("int ethtool_nl_strset_get_doit(struct sk_buff *skb, struct genl_info *info);"));
    assert!(out.contains("int ethtool_nl_strset_get_dumpit(struct sk_buff *skb,"));
    assert!(out.contains("struct netlink_callback *cb);"));
    assert!(out.contains("extern struct genl_family ethtool_nl_family;"));
}

const RECURSIVE_FAMILY: &str = "\
name: devlink
attribute-sets:
  -
    name: dl-dpipe-field
    attributes:
      -
        name: name
        type: string
      -
        name: child
        type: nest
        nested-attributes: dl-dpipe-field
  -
    name: main
    attributes:
      -
        name: field
        type: nest
        nested-attributes: dl-dpipe-field
operations:
  list:
    -
      name: dpipe-get
      attribute-set: main
      do:
        request:
          attributes:
            - field
        reply:
          attributes:
            - field
";

#[test]
fn recursive_nest_gets_forward_policy_decl() {
    let out = r#gen(Mode::User, false, RECURSIVE_FAMILY);
    assert!(out.contains("extern const struct ynl_policy_nest devlink_dl_dpipe_field_nest;"));
    // Recursive members are pointers and freed behind a NULL check.
    assert!(out.contains("if (obj->child)"));
    assert!(out.contains("devlink_dl_dpipe_field_free(obj->child);"));
}

#[test]
fn recursive_nest_member_is_a_pointer() {
    let out = r#gen(Mode::User, true, RECURSIVE_FAMILY);
    assert!(out.contains("struct devlink_dl_dpipe_field *child;"));
}

const SUBMSG_FAMILY: &str = "\
name: demo
attribute-sets:
  -
    name: foo-attrs
    attributes:
      -
        name: val
        type: u32
  -
    name: main
    attributes:
      -
        name: sel
        type: string
      -
        name: data
        type: sub-message
        sub-message: opts-msg
        selector: sel
sub-messages:
  -
    name: opts-msg
    formats:
      -
        value: foo
        attribute-set: foo-attrs
      -
        value: bar
operations:
  list:
    -
      name: get
      attribute-set: main
      do:
        request:
          attributes:
            - sel
        reply:
          attributes:
            - sel
            - data
";

#[test]
fn submsg_policy_carries_selector() {
    let out = r#gen(Mode::User, false, SUBMSG_FAMILY);
    assert!(out.contains(".is_submsg = 1, .selector_type = 1 },"));
    assert!(out.contains("[0] = { .type = YNL_PT_SUBMSG, .name = \"foo\", .nest = &demo_foo_attrs_nest, },"));
    assert!(out.contains("[1] = { .type = YNL_PT_SUBMSG, .name = \"bar\", },"));
    // The string selector is flagged in the policy.
    assert!(out.contains(".type = YNL_PT_NUL_STR, .is_selector = 1, "));
}

#[test]
fn submsg_parser_dispatches_on_selector_string() {
    let out = r#gen(Mode::User, false, SUBMSG_FAMILY);
    assert!(out.contains("if (!strcmp(sel, \"foo\"))"));
    assert!(out.contains("} else if (!strcmp(sel, \"bar\"))"));
    assert!(out.contains("return ynl_submsg_failed(yarg, \"data\", \"sel\");"));
    assert!(out.contains("int demo_opts_msg_parse(struct ynl_parse_arg *yarg, const char *sel,"));
}

const SPARSE_FAMILY: &str = "\
name: demo
definitions:
  -
    name: colors
    type: enum
    entries:
      -
        name: red
        value: 1
      -
        name: green
        value: 2
      -
        name: blue
        value: 4
attribute-sets:
  -
    name: main
    attributes:
      -
        name: color
        type: u32
        enum: colors
operations:
  list:
    -
      name: set
      attribute-set: main
      do:
        request:
          attributes:
            - color
";

#[test]
fn sparse_enum_gets_a_validate_callback() {
    let out = r#gen(Mode::Kernel, false, SPARSE_FAMILY);
    assert!(out.contains("demo_a_main_color_validate(const struct nlattr *attr,"));
    assert!(out.contains("switch (nla_get_u32(attr)) {"));
    assert!(out.contains("case DEMO_COLORS_RED:"));
    assert!(out.contains("fallthrough;"));
    assert!(out.contains("case DEMO_COLORS_BLUE:"));
    assert!(out.contains("NL_SET_ERR_MSG_ATTR(extack, attr, \"invalid enum value\");"));
    assert!(out.contains("return -EINVAL;"));
    assert!(out.contains(
        "[DEMO_A_MAIN_COLOR] = NLA_POLICY_VALIDATE_FN(NLA_U32, &demo_a_main_color_validate),"
    ));
}

#[test]
fn contiguous_enum_gets_max_policy() {
    let out = r#gen(
        Mode::Kernel,
        false,
        "\
name: demo
definitions:
  -
    name: mode
    type: enum
    entries: [off, on, auto]
attribute-sets:
  -
    name: main
    attributes:
      -
        name: mode
        type: u32
        enum: mode
operations:
  list:
    -
      name: set
      attribute-set: main
      do:
        request:
          attributes:
            - mode
",
    );
    assert!(out.contains("[DEMO_A_MAIN_MODE] = NLA_POLICY_MAX(NLA_U32, 2),"));
}

#[test]
fn policy_precedence_mask_beats_range() {
    let out = r#gen(
        Mode::Kernel,
        false,
        "\
name: demo
definitions:
  -
    name: caps
    type: flags
    entries: [a, b, c]
attribute-sets:
  -
    name: main
    attributes:
      -
        name: caps
        type: u32
        enum: caps
      -
        name: ranged
        type: u32
        checks:
          min: 2
          max: 200
      -
        name: wide
        type: u32
        checks:
          min: 1
          max: 100000
operations:
  list:
    -
      name: set
      attribute-set: main
      do:
        request:
          attributes:
            - caps
            - ranged
            - wide
",
    );
    assert!(out.contains("[DEMO_A_MAIN_CAPS] = NLA_POLICY_MASK(NLA_U32, 0x7),"));
    assert!(out.contains("[DEMO_A_MAIN_RANGED] = NLA_POLICY_RANGE(NLA_U32, 2, 200),"));
    assert!(out.contains(
        "[DEMO_A_MAIN_WIDE] = NLA_POLICY_FULL_RANGE(NLA_U32, &demo_a_main_wide_range),"
    ));
    assert!(out.contains("static const struct netlink_range_validation demo_a_main_wide_range = {"));
    assert!(out.contains(".min\t= 1ULL,"));
    assert!(out.contains(".max\t= 100000ULL,"));
}

const ARRAY_FAMILY: &str = "\
name: demo
attribute-sets:
  -
    name: main
    attributes:
      -
        name: macs
        type: indexed-array
        sub-type: binary
        checks:
          exact-len: 6
operations:
  list:
    -
      name: get
      attribute-set: main
      do:
        request:
          attributes:
            - macs
        reply:
          attributes:
            - macs
";

#[test]
fn indexed_array_of_binary_uses_fixed_size_rows() {
    let hdr = r#gen(Mode::User, true, ARRAY_FAMILY);
    assert!(hdr.contains("unsigned char (*macs)[6];"));
    assert!(hdr.contains("unsigned int n_macs;"));

    let src = r#gen(Mode::User, false, ARRAY_FAMILY);
    assert!(src.contains("array = ynl_attr_nest_start(nlh, DEMO_A_MAIN_MACS);"));
    assert!(src.contains("ynl_attr_put(nlh, i, req->macs[i], 6);"));
    assert!(src.contains("ynl_attr_nest_end(nlh, array);"));
    // Parse counts elements first, then allocates.
    assert!(src.contains("n_macs++;"));
    assert!(src.contains("dst->macs = calloc(n_macs, sizeof(*dst->macs));"));
    assert!(src.contains("memcpy(dst->macs[i], ynl_attr_data(attr), 6);"));
}

const CLASSIC_FAMILY: &str = "\
name: rt-demo
protocol: netlink-raw
protonum: 0
operations:
  enum-model: directional
  fixed-header: rtgenmsg
  name-prefix: rtm-
  list:
    -
      name: getdemo
      attribute-set: main
      do:
        request:
          value: 22
          attributes:
            - id
        reply:
          value: 20
          attributes:
            - id
attribute-sets:
  -
    name: main
    attributes:
      -
        name: id
        type: u32
";

#[test]
fn classic_do_request_carries_nlmsg_flags() {
    let hdr = r#gen(Mode::User, true, CLASSIC_FAMILY);
    assert!(hdr.contains("__u16 _nlmsg_flags;"));
    assert!(hdr.contains("rt_demo_getdemo_req_set_nlflags"));
    assert!(hdr.contains("req->_nlmsg_flags = nl_flags;"));

    let src = r#gen(Mode::User, false, CLASSIC_FAMILY);
    assert!(src.contains("nlh = ynl_msg_start_req(ys, RTM_GETDEMO, req->_nlmsg_flags);"));
    assert!(src.contains(".is_classic\t= true,"));
}

const UAPI_FAMILY: &str = "\
name: demo
definitions:
  -
    name: colors
    type: enum
    entries:
      - red
      - green
      -
        name: blue
        value: 9
  -
    name: caps
    type: flags
    entries: [one, two]
  -
    name: max-size
    type: const
    value: 64
attribute-sets:
  -
    name: main
    attributes:
      -
        name: id
        type: u32
      -
        name: big
        type: u32
        value: 5
operations:
  list:
    -
      name: get
      attribute-set: main
      do:
        request:
          attributes:
            - id
mcast-groups:
  list:
    -
      name: events
";

#[test]
fn uapi_enum_values_follow_value_change() {
    let out = r#gen(Mode::Uapi, true, UAPI_FAMILY);
    assert!(out.contains("#ifndef _UAPI_LINUX_DEMO_H"));
    assert!(out.contains("#define DEMO_FAMILY_NAME\t\"demo\""));
    assert!(out.contains("#define DEMO_FAMILY_VERSION\t1"));
    // Contiguous values stay implicit; jumps are explicit.
    assert!(out.contains("DEMO_COLORS_RED,"));
    assert!(out.contains("DEMO_COLORS_GREEN,"));
    assert!(out.contains("DEMO_COLORS_BLUE = 9,"));
    // Flags always spell their (shifted) values.
    assert!(out.contains("DEMO_CAPS_ONE = 1,"));
    assert!(out.contains("DEMO_CAPS_TWO = 2,"));
    assert!(out.contains("#define DEMO_MAX_SIZE\t64"));
    // Attribute ids: 1 is a jump from the implicit 0, then implicit.
    assert!(out.contains("DEMO_A_MAIN_ID = 1,"));
    assert!(out.contains("DEMO_A_MAIN_BIG = 5,"));
    assert!(out.contains("__DEMO_A_MAIN_MAX,"));
    assert!(out.contains("DEMO_A_MAIN_MAX = (__DEMO_A_MAIN_MAX - 1)"));
    // Operations and multicast groups.
    assert!(out.contains("DEMO_CMD_GET = 1,"));
    assert!(out.contains("#define DEMO_MCGRP_EVENTS\t\"events\""));
}

#[test]
fn excluded_ops_keep_survivor_numbering() {
    let out = gen_with(Mode::Uapi, true, UAPI_FAMILY, &["get"]);
    assert!(!out.contains("DEMO_CMD_GET"));

    let yaml = "\
name: demo
attribute-sets:
  -
    name: main
    attributes:
      -
        name: id
        type: u32
operations:
  list:
    -
      name: first
      attribute-set: main
      do:
        request:
          attributes:
            - id
    -
      name: second
      attribute-set: main
      do:
        request:
          attributes:
            - id
";
    let out = gen_with(Mode::Uapi, true, yaml, &["first"]);
    // 'second' keeps its wire value even though 'first' is gone.
    assert!(out.contains("DEMO_CMD_SECOND = 2,"));
}

#[test]
fn generation_is_deterministic() {
    let a = r#gen(Mode::User, false, SPLIT_FAMILY);
    let b = r#gen(Mode::User, false, SPLIT_FAMILY);
    assert_eq!(a, b);
}

#[test]
fn wrong_license_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let spec = dir.path().join("family.yaml");
    fs::write(
        &spec,
        "# SPDX-License-Identifier: MIT\nname: demo\noperations:\n  list: []\n",
    )
    .unwrap();

    let opts = GenOptions {
        mode: Mode::Uapi,
        header: true,
        spec,
        out_file: Some(dir.path().join("out.h")),
        cmp_out: false,
        user_headers: Vec::new(),
        exclude_ops: Vec::new(),
    };
    let err = generate(&opts).unwrap_err();
    assert!(err.to_string().contains("License must be:"));
    // No partial output left behind.
    assert!(!dir.path().join("out.h").exists());
}

#[test]
fn user_header_has_request_helpers() {
    let out = r#gen(Mode::User, true, SPLIT_FAMILY);
    assert!(out.contains("struct ethtool_strset_get_req {"));
    assert!(out.contains("static inline struct ethtool_strset_get_req *ethtool_strset_get_req_alloc(void)"));
    assert!(out.contains("void ethtool_strset_get_req_free(struct ethtool_strset_get_req *req);"));
    assert!(out.contains(
        "struct ethtool_strset_get_rsp *\nethtool_strset_get(struct ynl_sock *ys, struct ethtool_strset_get_req *req);"
    ));
    // Dump wrapper type is a linked list.
    assert!(out.contains("struct ethtool_strset_get_list {"));
    assert!(out.contains("struct ethtool_strset_get_list *next;"));
    // Nested struct setter recurses into members.
    assert!(out.contains("ethtool_strset_get_req_set_header_dev_index"));
}

#[test]
fn user_source_serializes_and_parses() {
    let out = r#gen(Mode::User, false, SPLIT_FAMILY);
    assert!(out.contains("const char *ethtool_op_str(int op)"));
    assert!(out.contains("nlh = ynl_gemsg_start_req(ys, ys->family_id, ETHTOOL_CMD_STRSET_GET, 1);"));
    assert!(out.contains("err = ynl_exec(ys, nlh, &yrs);"));
    assert!(out.contains("err = ynl_exec_dump(ys, nlh, &yds);"));
    assert!(out.contains("int ethtool_header_put(struct nlmsghdr *nlh, unsigned int attr_type,"));
    assert!(out.contains("ynl_attr_for_each_nested(attr, nested)"));
    assert!(out.contains("if (ynl_attr_validate(yarg, attr))"));
    assert!(out.contains("dst->_present.dev_index = 1;"));
    // String members carry their length and are freed.
    assert!(out.contains("dst->_len.dev_name = len;"));
    assert!(out.contains("free(obj->dev_name);"));
    assert!(out.contains("const struct ynl_family ynl_ethtool_family =  {"));
}

#[test]
fn event_ops_render_reply_parsing() {
    let yaml = "\
name: demo
attribute-sets:
  -
    name: main
    attributes:
      -
        name: id
        type: u32
operations:
  list:
    -
      name: get
      attribute-set: main
      do:
        request:
          attributes:
            - id
        reply:
          attributes:
            - id
    -
      name: changed
      attribute-set: main
      event:
        attributes:
          - id
mcast-groups:
  list:
    -
      name: events
";
    let src = r#gen(Mode::User, false, yaml);
    assert!(src.contains("/* DEMO_CMD_CHANGED - event */"));
    assert!(src.contains("demo_changed_rsp_parse"));
    assert!(src.contains("static const struct ynl_ntf_info demo_ntf_info[] =  {"));
    assert!(src.contains("[DEMO_CMD_CHANGED] =  {"));

    let hdr = r#gen(Mode::User, true, yaml);
    assert!(hdr.contains("struct demo_changed_rsp {"));
    assert!(hdr.contains("struct demo_changed {"));
    assert!(hdr.contains("__u16 family;"));
}

#[test]
fn global_policy_renders_single_table() {
    let yaml = "\
name: demo
kernel-policy: global
attribute-sets:
  -
    name: main
    attributes:
      -
        name: a
        type: u32
      -
        name: b
        type: u32
operations:
  list:
    -
      name: one
      attribute-set: main
      do:
        request:
          attributes:
            - a
    -
      name: two
      attribute-set: main
      do:
        request:
          attributes:
            - b
";
    let out = r#gen(Mode::Kernel, false, yaml);
    assert!(out.contains("/* Global operation policy for demo */"));
    assert!(out.contains("const struct nla_policy demo_main_nl_policy[DEMO_A_MAIN_B + 1] = {"));
    assert!(out.contains("static const struct genl_small_ops demo_nl_ops[] = {"));
}
