//! Per-attribute emission: policy entries, parse/put fragments, struct
//! members, free code and setters. One match arm per wire type; the
//! multi-attribute wrapper takes precedence where it changes behavior.

use crate::ir::{Attr, AttrKind, Family, LimitKind, Presence};
use crate::names::{c_lower, c_upper};
use crate::shape::{Direction, RenderInfo, Space};
use crate::writer::CodeWriter;

use super::{op_prefix, type_name};

impl Attr {
    pub fn free_needs_iter(&self) -> bool {
        self.multi && (self.attr_type == "nest" || self.attr_type == "string")
    }

    pub fn is_recursive(&self, family: &Family) -> bool {
        match self.kind {
            AttrKind::Nest | AttrKind::SubMessage => family
                .pure_nested_structs
                .get(&self.nested().name)
                .map(|s| s.recursive)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Recursive nests become pointers in space-level structs; inside an
    /// op-level struct the cycle is already broken.
    pub fn is_recursive_for_op(&self, family: &Family, ri: &RenderInfo) -> bool {
        self.is_recursive(family) && ri.op_name.is_none()
    }

    /// Line this attribute contributes to one of the `_present`/`_len`/
    /// `_count` groups.
    pub fn presence_member(&self, space: Space, filter: Presence) -> Option<String> {
        if self.presence_type() != filter {
            return None;
        }
        let pfx = if space == Space::User { "__" } else { "" };
        match self.presence_type() {
            Presence::Present => Some(format!("{}u32 {}:1;", pfx, self.c_name)),
            Presence::Len | Presence::Count => Some(format!("{}u32 {};", pfx, self.c_name)),
            _ => None,
        }
    }

    fn byte_order_comment(&self) -> String {
        match &self.byte_order {
            Some(bo) => format!(" /* {} */", bo),
            None => String::new(),
        }
    }

    /// Member type when the attribute maps to a single complex C object.
    fn complex_member_type(
        &self,
        _family: &Family,
        ri: &RenderInfo,
    ) -> Result<Option<String>, String> {
        let scalar_pfx = if ri.ku_space == Space::User { "__" } else { "" };
        if self.multi {
            return if self.attr_type == "nest" {
                Ok(Some(self.nested().struct_type.clone()))
            } else if self.attr_type == "binary" && self.struct_ref.is_some() {
                Ok(None) // rendered through arg_member()
            } else if self.attr_type == "string" {
                Ok(Some("struct ynl_string *".to_string()))
            } else if crate::ir::is_scalar_type(&self.attr_type) {
                Ok(Some(format!("{}{}", scalar_pfx, self.attr_type)))
            } else {
                Err(format!("Sub-type {} not supported yet", self.attr_type))
            };
        }
        match self.kind {
            AttrKind::ArrayNest => match self.sub_type.as_deref() {
                None | Some("nest") => Ok(Some(self.nested().struct_type.clone())),
                Some(sub) if crate::ir::is_scalar_type(sub) => {
                    Ok(Some(format!("{}{}", scalar_pfx, sub)))
                }
                Some("binary") if self.checks.exact_len.is_some() => Ok(None),
                Some(sub) => Err(format!("Sub-type {} not supported yet", sub)),
            },
            AttrKind::Bitfield32 => Ok(Some("struct nla_bitfield32".to_string())),
            AttrKind::Nest | AttrKind::SubMessage | AttrKind::NestTypeValue => {
                Ok(Some(self.nested().struct_type.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Parameters a setter (or constructor) takes for this attribute.
    pub fn arg_member(&self, family: &Family, ri: &RenderInfo) -> Result<Vec<String>, String> {
        if self.multi && self.attr_type == "binary" && self.struct_ref.is_some() {
            return Ok(vec![
                format!(
                    "struct {} *{}",
                    c_lower(self.struct_ref.as_ref().unwrap()),
                    self.c_name
                ),
                format!("unsigned int n_{}", self.c_name),
            ]);
        }
        if !self.multi {
            match self.kind {
                AttrKind::Unused | AttrKind::Pad | AttrKind::Flag => return Ok(Vec::new()),
                AttrKind::Scalar => {
                    return Ok(vec![format!(
                        "{} {}{}",
                        self.type_name,
                        self.c_name,
                        self.byte_order_comment()
                    )]);
                }
                AttrKind::String => {
                    return Ok(vec![format!("const char *{}", self.c_name)]);
                }
                AttrKind::BinaryScalarArray => {
                    return Ok(vec![
                        format!(
                            "__{} *{}",
                            self.sub_type.as_deref().unwrap_or_default(),
                            self.c_name
                        ),
                        "size_t count".to_string(),
                    ]);
                }
                AttrKind::Binary | AttrKind::BinaryStruct => {
                    return Ok(vec![
                        format!("const void *{}", self.c_name),
                        "size_t len".to_string(),
                    ]);
                }
                AttrKind::ArrayNest
                    if self.sub_type.as_deref() == Some("binary")
                        && self.checks.exact_len.is_some() =>
                {
                    let len = self
                        .get_limit_str(family, LimitKind::ExactLen, "")
                        .unwrap_or_default();
                    return Ok(vec![
                        format!("unsigned char (*{})[{}]", self.c_name, len),
                        format!("unsigned int n_{}", self.c_name),
                    ]);
                }
                _ => {}
            }
        }
        let member = self
            .complex_member_type(family, ri)?
            .ok_or_else(|| format!("Struct member not implemented for type {}", self.attr_type))?;
        let spc = if member.ends_with('*') { "" } else { " " };
        let mut args = vec![format!("{}{}*{}", member, spc, self.c_name)];
        if self.presence_type() == Presence::Count {
            args.push(format!("unsigned int n_{}", self.c_name));
        }
        Ok(args)
    }

    /// Field(s) this attribute contributes to the generated struct.
    pub fn struct_member(
        &self,
        family: &Family,
        ri: &RenderInfo,
        cw: &mut CodeWriter,
    ) -> Result<(), String> {
        if !self.multi {
            match self.kind {
                AttrKind::Unused | AttrKind::Pad => return Ok(()),
                AttrKind::String => {
                    cw.p(&format!("char *{};", self.c_name));
                    return Ok(());
                }
                AttrKind::Binary => {
                    cw.p(&format!("void *{};", self.c_name));
                    return Ok(());
                }
                AttrKind::BinaryStruct => {
                    cw.p(&format!(
                        "struct {} *{};",
                        c_lower(self.struct_ref.as_ref().unwrap()),
                        self.c_name
                    ));
                    return Ok(());
                }
                AttrKind::BinaryScalarArray => {
                    cw.p(&format!(
                        "__{} *{};",
                        self.sub_type.as_deref().unwrap_or_default(),
                        self.c_name
                    ));
                    return Ok(());
                }
                _ => {}
            }
        }
        if let Some(member) = self.complex_member_type(family, ri)? {
            let mut ptr = if self.is_multi_val() { "*" } else { "" };
            if self.is_recursive_for_op(family, ri) {
                ptr = "*";
            }
            let spc = if member.ends_with('*') { "" } else { " " };
            cw.p(&format!("{}{}{}{};", member, spc, ptr, self.c_name));
            return Ok(());
        }
        for one in self.arg_member(family, ri)? {
            cw.p(&format!("{};", one));
        }
        Ok(())
    }

    /// Kernel policy table entry.
    pub fn attr_policy(&self, family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
        match self.kind {
            AttrKind::Unused | AttrKind::Pad => return Ok(()),
            AttrKind::String => {
                let policy = if self.checks.unterminated_ok {
                    "NLA_STRING"
                } else {
                    "NLA_NUL_STRING"
                };
                let spec = self.policy_form(family, policy)?;
                cw.p(&format!("\t[{}] = {},", self.enum_name, spec));
                return Ok(());
            }
            _ => {}
        }
        let mut policy = format!("NLA_{}", c_upper(&self.attr_type));
        if self.byte_order.as_deref() == Some("big-endian")
            && (self.attr_type == "u16" || self.attr_type == "u32")
        {
            policy = format!("NLA_BE{}", &self.attr_type[1..]);
        }
        let spec = self.policy_form(family, &policy)?;
        cw.p(&format!("\t[{}] = {},", self.enum_name, spec));
        Ok(())
    }

    /// The validation clause itself, by kind.
    fn policy_form(&self, family: &Family, policy: &str) -> Result<String, String> {
        match self.kind {
            AttrKind::Scalar => self.scalar_policy_form(family, policy),
            AttrKind::String => {
                if self.checks.exact_len.is_some() {
                    Ok(format!(
                        "NLA_POLICY_EXACT_LEN({})",
                        self.get_limit_str(family, LimitKind::ExactLen, "")?
                    ))
                } else {
                    let mut mem = format!("{{ .type = {}", policy);
                    if self.checks.max_len.is_some() {
                        mem.push_str(&format!(
                            ", .len = {}",
                            self.get_limit_str(family, LimitKind::MaxLen, "")?
                        ));
                    }
                    mem.push_str(", }");
                    Ok(mem)
                }
            }
            AttrKind::Binary | AttrKind::BinaryStruct | AttrKind::BinaryScalarArray => {
                self.binary_policy_form(family)
            }
            AttrKind::Bitfield32 => {
                let enum_ref = self
                    .enum_ref
                    .as_ref()
                    .ok_or_else(|| format!("Enum required for bitfield32 attr '{}'", self.name))?;
                let enum_set = family.consts[enum_ref]
                    .enum_set
                    .as_ref()
                    .ok_or_else(|| format!("'{}' is not an enum", enum_ref))?;
                Ok(format!("NLA_POLICY_BITFIELD32({})", enum_set.get_mask(true)))
            }
            AttrKind::Nest | AttrKind::SubMessage => Ok(format!(
                "NLA_POLICY_NESTED({}_nl_policy)",
                self.nested().render_name
            )),
            _ => Ok(format!("{{ .type = {}, }}", policy)),
        }
    }

    fn scalar_policy_form(&self, family: &Family, policy: &str) -> Result<String, String> {
        if self.checks.flags_mask.is_some() || self.is_bitfield {
            let mask = if self.is_bitfield {
                let enum_set = family.consts[self.enum_ref.as_ref().unwrap()]
                    .enum_set
                    .as_ref()
                    .ok_or_else(|| format!("'{}' is not an enum", self.name))?;
                enum_set.get_mask(true)
            } else {
                let flags_name = self.checks.flags_mask.as_ref().unwrap();
                let flags = family
                    .consts
                    .get(flags_name)
                    .and_then(|c| c.enum_set.as_ref())
                    .ok_or_else(|| format!("unknown flags set '{}'", flags_name))?;
                (1i128 << flags.entries.len()) - 1
            };
            Ok(format!("NLA_POLICY_MASK({}, 0x{:x})", policy, mask))
        } else if self.checks.full_range {
            Ok(format!(
                "NLA_POLICY_FULL_RANGE({}, &{}_range)",
                policy,
                c_lower(&self.enum_name)
            ))
        } else if self.checks.range {
            Ok(format!(
                "NLA_POLICY_RANGE({}, {}, {})",
                policy,
                self.get_limit_str(family, LimitKind::Min, "")?,
                self.get_limit_str(family, LimitKind::Max, "")?
            ))
        } else if self.checks.min.is_some() {
            Ok(format!(
                "NLA_POLICY_MIN({}, {})",
                policy,
                self.get_limit_str(family, LimitKind::Min, "")?
            ))
        } else if self.checks.max.is_some() {
            Ok(format!(
                "NLA_POLICY_MAX({}, {})",
                policy,
                self.get_limit_str(family, LimitKind::Max, "")?
            ))
        } else if self.checks.sparse {
            Ok(format!(
                "NLA_POLICY_VALIDATE_FN({}, &{}_validate)",
                policy,
                c_lower(&self.enum_name)
            ))
        } else {
            Ok(format!("{{ .type = {}, }}", policy))
        }
    }

    fn binary_policy_form(&self, family: &Family) -> Result<String, String> {
        let present = self.yaml_checks.present();
        match present.len() {
            0 => {}
            1 => {
                let check = present[0];
                if !matches!(check, "exact-len" | "min-len" | "max-len") {
                    return Err(format!("Unsupported check for binary type: {}", check));
                }
            }
            _ => {
                return Err("More than one check for binary type not implemented, yet".to_string());
            }
        }

        if self.checks.exact_len.is_some() {
            Ok(format!(
                "NLA_POLICY_EXACT_LEN({})",
                self.get_limit_str(family, LimitKind::ExactLen, "")?
            ))
        } else if self.checks.min_len.is_some() {
            Ok(format!(
                "{{ .len = {}, }}",
                self.get_limit_str(family, LimitKind::MinLen, "")?
            ))
        } else if self.checks.max_len.is_some() {
            Ok(format!(
                "NLA_POLICY_MAX_LEN({})",
                self.get_limit_str(family, LimitKind::MaxLen, "")?
            ))
        } else {
            Ok("{ .type = NLA_BINARY, }".to_string())
        }
    }

    /// User-side policy (`ynl_policy_attr`) clause, without the name.
    pub fn attr_typol(&self, family: &Family) -> Result<String, String> {
        // The wrapper shares the wire type of its base attribute.
        match self.kind {
            AttrKind::Unused => Ok(".type = YNL_PT_REJECT, ".to_string()),
            AttrKind::Pad => Ok(".type = YNL_PT_IGNORE, ".to_string()),
            AttrKind::Scalar => Ok(format!(
                ".type = YNL_PT_U{}, ",
                c_upper(&self.attr_type[1..])
            )),
            AttrKind::Flag => Ok(".type = YNL_PT_FLAG, ".to_string()),
            AttrKind::String => {
                let mut typol = ".type = YNL_PT_NUL_STR, ".to_string();
                if self.is_selector {
                    typol.push_str(".is_selector = 1, ");
                }
                Ok(typol)
            }
            AttrKind::Binary | AttrKind::BinaryStruct | AttrKind::BinaryScalarArray => {
                Ok(".type = YNL_PT_BINARY,".to_string())
            }
            AttrKind::Bitfield32 => Ok(".type = YNL_PT_BITFIELD32, ".to_string()),
            AttrKind::Nest | AttrKind::NestTypeValue => Ok(format!(
                ".type = YNL_PT_NEST, .nest = &{}_nest, ",
                self.nested().render_name
            )),
            AttrKind::SubMessage => {
                let mut typol = format!(
                    ".type = YNL_PT_NEST, .nest = &{}_nest, ",
                    self.nested().render_name
                );
                typol.push_str(".is_submsg = 1, ");
                // Reverse-parsing of the policy does not support external
                // selectors; no family uses them on the request side.
                let sel = self.selector.as_ref().unwrap();
                if !sel.external {
                    let sel_attr = family.attr(&self.attr_set, &sel.name);
                    typol.push_str(&format!(".selector_type = {} ", sel_attr.value));
                }
                Ok(typol)
            }
            AttrKind::ArrayNest => match self.sub_type.as_deref() {
                Some(sub) if crate::ir::is_scalar_type(sub) => {
                    Ok(format!(".type = YNL_PT_U{}, ", c_upper(&sub[1..])))
                }
                Some("binary") if self.checks.exact_len.is_some() => Ok(format!(
                    ".type = YNL_PT_BINARY, .len = {}, ",
                    self.get_limit_str(family, LimitKind::ExactLen, "")?
                )),
                _ => Ok(format!(
                    ".type = YNL_PT_NEST, .nest = &{}_nest, ",
                    self.nested().render_name
                )),
            },
        }
    }

    pub fn emit_attr_typol(&self, family: &Family, cw: &mut CodeWriter) -> Result<(), String> {
        let typol = self.attr_typol(family)?;
        cw.p(&format!(
            "[{}] = {{ .name = \"{}\", {}}},",
            self.enum_name, self.name, typol
        ));
        Ok(())
    }

    fn attr_put_line(&self, cw: &mut CodeWriter, var: &str, line: &str) {
        let presence = self.presence_type();
        if matches!(presence, Presence::Present | Presence::Len) {
            cw.p(&format!(
                "if ({}->_{}.{})",
                var,
                presence.tag(),
                self.c_name
            ));
        }
        cw.p(&format!("{};", line));
    }

    fn attr_put_simple(&self, cw: &mut CodeWriter, var: &str, put_type: &str) {
        let line = format!(
            "ynl_attr_put_{}(nlh, {}, {}->{})",
            put_type, self.enum_name, var, self.c_name
        );
        self.attr_put_line(cw, var, &line);
    }

    /// Serialization fragment.
    pub fn attr_put(
        &self,
        family: &Family,
        ri: &RenderInfo,
        cw: &mut CodeWriter,
        var: &str,
    ) -> Result<(), String> {
        if self.multi {
            return self.multi_attr_put(cw, var);
        }
        match self.kind {
            AttrKind::Unused | AttrKind::Pad => Ok(()),
            AttrKind::Scalar => {
                self.attr_put_simple(cw, var, &self.attr_type);
                Ok(())
            }
            AttrKind::Flag => {
                self.attr_put_line(
                    cw,
                    var,
                    &format!("ynl_attr_put(nlh, {}, NULL, 0)", self.enum_name),
                );
                Ok(())
            }
            AttrKind::String => {
                self.attr_put_simple(cw, var, "str");
                Ok(())
            }
            AttrKind::Binary | AttrKind::BinaryStruct => {
                self.attr_put_line(
                    cw,
                    var,
                    &format!(
                        "ynl_attr_put(nlh, {}, {}->{}, {}->_len.{})",
                        self.enum_name, var, self.c_name, var, self.c_name
                    ),
                );
                Ok(())
            }
            AttrKind::BinaryScalarArray => {
                let sub = self.sub_type.as_deref().unwrap_or_default();
                cw.block_start(&format!("if ({}->_count.{})", var, self.c_name));
                cw.p(&format!(
                    "i = {}->_count.{} * sizeof(__{});",
                    var, self.c_name, sub
                ));
                cw.p(&format!(
                    "ynl_attr_put(nlh, {}, {}->{}, i);",
                    self.enum_name, var, self.c_name
                ));
                cw.block_end("");
                Ok(())
            }
            AttrKind::Bitfield32 => {
                self.attr_put_line(
                    cw,
                    var,
                    &format!(
                        "ynl_attr_put(nlh, {}, &{}->{}, sizeof(struct nla_bitfield32))",
                        self.enum_name, var, self.c_name
                    ),
                );
                Ok(())
            }
            AttrKind::Nest | AttrKind::SubMessage => {
                let at = if self.is_recursive_for_op(family, ri) {
                    ""
                } else {
                    "&"
                };
                self.attr_put_line(
                    cw,
                    var,
                    &format!(
                        "{}_put(nlh, {}, {}{}->{})",
                        self.nested().render_name,
                        self.enum_name,
                        at,
                        var,
                        self.c_name
                    ),
                );
                Ok(())
            }
            AttrKind::ArrayNest => self.array_nest_put(family, cw, var),
            AttrKind::NestTypeValue => Err(format!(
                "Put not implemented for class type {}",
                self.attr_type
            )),
        }
    }

    fn multi_attr_put(&self, cw: &mut CodeWriter, var: &str) -> Result<(), String> {
        if crate::ir::is_scalar_type(&self.attr_type) {
            cw.p(&format!(
                "for (i = 0; i < {}->_count.{}; i++)",
                var, self.c_name
            ));
            cw.p(&format!(
                "ynl_attr_put_{}(nlh, {}, {}->{}[i]);",
                self.attr_type, self.enum_name, var, self.c_name
            ));
        } else if self.attr_type == "binary" && self.struct_ref.is_some() {
            cw.p(&format!(
                "for (i = 0; i < {}->_count.{}; i++)",
                var, self.c_name
            ));
            cw.p(&format!(
                "ynl_attr_put(nlh, {}, &{}->{}[i], sizeof(struct {}));",
                self.enum_name,
                var,
                self.c_name,
                c_lower(self.struct_ref.as_ref().unwrap())
            ));
        } else if self.attr_type == "string" {
            cw.p(&format!(
                "for (i = 0; i < {}->_count.{}; i++)",
                var, self.c_name
            ));
            cw.p(&format!(
                "ynl_attr_put_str(nlh, {}, {}->{}[i]->str);",
                self.enum_name, var, self.c_name
            ));
        } else if self.attr_type == "nest" {
            cw.p(&format!(
                "for (i = 0; i < {}->_count.{}; i++)",
                var, self.c_name
            ));
            self.attr_put_line(
                cw,
                var,
                &format!(
                    "{}_put(nlh, {}, &{}->{}[i])",
                    self.nested().render_name,
                    self.enum_name,
                    var,
                    self.c_name
                ),
            );
        } else {
            return Err(format!(
                "Put of MultiAttr sub-type {} not supported yet",
                self.attr_type
            ));
        }
        Ok(())
    }

    fn array_nest_put(
        &self,
        family: &Family,
        cw: &mut CodeWriter,
        var: &str,
    ) -> Result<(), String> {
        cw.p(&format!(
            "array = ynl_attr_nest_start(nlh, {});",
            self.enum_name
        ));
        match self.sub_type.as_deref() {
            Some(sub) if crate::ir::is_scalar_type(sub) => {
                cw.block_start(&format!(
                    "for (i = 0; i < {}->_count.{}; i++)",
                    var, self.c_name
                ));
                cw.p(&format!(
                    "ynl_attr_put_{}(nlh, i, {}->{}[i]);",
                    sub, var, self.c_name
                ));
                cw.block_end("");
            }
            Some("binary") if self.checks.exact_len.is_some() => {
                cw.p(&format!(
                    "for (i = 0; i < {}->_count.{}; i++)",
                    var, self.c_name
                ));
                cw.p(&format!(
                    "ynl_attr_put(nlh, i, {}->{}[i], {});",
                    var,
                    self.c_name,
                    self.get_limit_str(family, LimitKind::ExactLen, "")?
                ));
            }
            Some("nest") => {
                cw.p(&format!(
                    "for (i = 0; i < {}->_count.{}; i++)",
                    var, self.c_name
                ));
                cw.p(&format!(
                    "{}_put(nlh, i, &{}->{}[i]);",
                    self.nested().render_name,
                    var,
                    self.c_name
                ));
            }
            other => {
                return Err(format!(
                    "Put for ArrayNest sub-type {:?} not supported, yet",
                    other
                ));
            }
        }
        cw.p("ynl_attr_nest_end(nlh, array);");
        Ok(())
    }

    /// Parse fragment: (body lines, init lines, local variables).
    pub fn attr_get_parts(
        &self,
        family: &Family,
        var: &str,
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>), String> {
        if self.multi {
            return Ok((vec![format!("n_{}++;", self.c_name)], vec![], vec![]));
        }
        match self.kind {
            AttrKind::Unused => Ok((vec!["return YNL_PARSE_CB_ERROR;".to_string()], vec![], vec![])),
            AttrKind::Flag => Ok((vec![], vec![], vec![])),
            AttrKind::Scalar => Ok((
                vec![format!(
                    "{}->{} = ynl_attr_get_{}(attr);",
                    var, self.c_name, self.attr_type
                )],
                vec![],
                vec![],
            )),
            AttrKind::String => Ok((
                vec![
                    format!("{}->_len.{} = len;", var, self.c_name),
                    format!("{}->{} = malloc(len + 1);", var, self.c_name),
                    format!(
                        "memcpy({}->{}, ynl_attr_get_str(attr), len);",
                        var, self.c_name
                    ),
                    format!("{}->{}[len] = 0;", var, self.c_name),
                ],
                vec!["len = strnlen(ynl_attr_get_str(attr), ynl_attr_data_len(attr));".to_string()],
                vec!["unsigned int len;".to_string()],
            )),
            AttrKind::Binary => Ok((
                vec![
                    format!("{}->_len.{} = len;", var, self.c_name),
                    format!("{}->{} = malloc(len);", var, self.c_name),
                    format!("memcpy({}->{}, ynl_attr_data(attr), len);", var, self.c_name),
                ],
                vec!["len = ynl_attr_data_len(attr);".to_string()],
                vec!["unsigned int len;".to_string()],
            )),
            AttrKind::BinaryStruct => {
                let struct_sz = format!(
                    "sizeof(struct {})",
                    c_lower(self.struct_ref.as_ref().unwrap())
                );
                Ok((
                    vec![
                        format!(
                            "{}->_{}.{} = len;",
                            var,
                            self.presence_type().tag(),
                            self.c_name
                        ),
                        format!("if (len < {})", struct_sz),
                        format!("{}->{} = calloc(1, {});", var, self.c_name, struct_sz),
                        "else".to_string(),
                        format!("{}->{} = malloc(len);", var, self.c_name),
                        format!("memcpy({}->{}, ynl_attr_data(attr), len);", var, self.c_name),
                    ],
                    vec!["len = ynl_attr_data_len(attr);".to_string()],
                    vec!["unsigned int len;".to_string()],
                ))
            }
            AttrKind::BinaryScalarArray => {
                let sub = self.sub_type.as_deref().unwrap_or_default();
                Ok((
                    vec![
                        format!(
                            "{}->_count.{} = len / sizeof(__{});",
                            var, self.c_name, sub
                        ),
                        format!("len = {}->_count.{} * sizeof(__{});", var, self.c_name, sub),
                        format!("{}->{} = malloc(len);", var, self.c_name),
                        format!("memcpy({}->{}, ynl_attr_data(attr), len);", var, self.c_name),
                    ],
                    vec!["len = ynl_attr_data_len(attr);".to_string()],
                    vec!["unsigned int len;".to_string()],
                ))
            }
            AttrKind::Bitfield32 => Ok((
                vec![format!(
                    "memcpy(&{}->{}, ynl_attr_data(attr), sizeof(struct nla_bitfield32));",
                    var, self.c_name
                )],
                vec![],
                vec![],
            )),
            AttrKind::Nest => {
                let nested = self.nested();
                let pns = family
                    .pure_nested_structs
                    .get(&nested.name)
                    .ok_or_else(|| format!("unresolved nested set '{}'", nested.name))?;
                let mut args = vec!["&parg".to_string(), "attr".to_string()];
                for sel in pns.external_selectors(family) {
                    args.push(format!("{}->{}", var, c_lower(&sel)));
                }
                Ok((
                    vec![
                        format!("if ({}_parse({}))", nested.render_name, args.join(", ")),
                        "return YNL_PARSE_CB_ERROR;".to_string(),
                    ],
                    vec![
                        format!("parg.rsp_policy = &{}_nest;", nested.render_name),
                        format!("parg.data = &{}->{};", var, self.c_name),
                    ],
                    vec![],
                ))
            }
            AttrKind::SubMessage => {
                let nested = self.nested();
                let sel = self.selector.as_ref().unwrap();
                let sel_lower = c_lower(&sel.name);
                let sel_var = if sel.external {
                    format!("_sel_{}", sel_lower)
                } else {
                    format!("{}->{}", var, sel_lower)
                };
                Ok((
                    vec![
                        format!("if (!{})", sel_var),
                        format!(
                            "return ynl_submsg_failed(yarg, \"{}\", \"{}\");",
                            self.name, sel.name
                        ),
                        format!("if ({}_parse(&parg, {}, attr))", nested.render_name, sel_var),
                        "return YNL_PARSE_CB_ERROR;".to_string(),
                    ],
                    vec![
                        format!("parg.rsp_policy = &{}_nest;", nested.render_name),
                        format!("parg.data = &{}->{};", var, self.c_name),
                    ],
                    vec![],
                ))
            }
            AttrKind::ArrayNest => Ok((
                vec![
                    format!("attr_{} = attr;", self.c_name),
                    "ynl_attr_for_each_nested(attr2, attr) {".to_string(),
                    "\tif (ynl_attr_validate(yarg, attr2))".to_string(),
                    "\t\treturn YNL_PARSE_CB_ERROR;".to_string(),
                    format!("\tn_{}++;", self.c_name),
                    "}".to_string(),
                ],
                vec![],
                vec!["const struct nlattr *attr2;".to_string()],
            )),
            AttrKind::NestTypeValue => {
                let nested = self.nested();
                let mut prev = "attr".to_string();
                let mut get_lines = Vec::new();
                let mut local_vars = Vec::new();
                let init_lines = vec![
                    format!("parg.rsp_policy = &{}_nest;", nested.render_name),
                    format!("parg.data = &{}->{};", var, self.c_name),
                ];
                let mut tv_args = String::new();
                if !self.type_value.is_empty() {
                    let tv_names: Vec<String> =
                        self.type_value.iter().map(|x| c_lower(x)).collect();
                    local_vars.push(format!(
                        "const struct nlattr *attr_{};",
                        tv_names.join(", *attr_")
                    ));
                    local_vars.push(format!("__u32 {};", tv_names.join(", ")));
                    for level in &tv_names {
                        get_lines.push(format!("attr_{} = ynl_attr_data({});", level, prev));
                        get_lines.push(format!("{} = ynl_attr_type(attr_{});", level, level));
                        prev = format!("attr_{}", level);
                    }
                    tv_args = format!(", {}", tv_names.join(", "));
                }
                get_lines.push(format!(
                    "{}_parse(&parg, {}{});",
                    nested.render_name, prev, tv_args
                ));
                Ok((get_lines, init_lines, local_vars))
            }
            AttrKind::Pad => Err(format!(
                "Attr get not implemented for class type {}",
                self.attr_type
            )),
        }
    }

    /// Parse dispatch arm. Returns whether an arm was emitted.
    pub fn attr_get(
        &self,
        family: &Family,
        cw: &mut CodeWriter,
        var: &str,
        first: bool,
    ) -> Result<bool, String> {
        if !self.multi && matches!(self.kind, AttrKind::Unused | AttrKind::Pad) {
            return Ok(false);
        }
        let (lines, init_lines, local_vars) = self.attr_get_parts(family, var)?;

        let kw = if first { "if" } else { "else if" };
        cw.block_start(&format!("{} (type == {})", kw, self.enum_name));
        if !local_vars.is_empty() {
            for local in &local_vars {
                cw.p(local);
            }
            cw.nl();
        }

        if !self.is_multi_val() {
            cw.p("if (ynl_attr_validate(yarg, attr))");
            cw.p("return YNL_PARSE_CB_ERROR;");
            if self.presence_type() == Presence::Present {
                cw.p(&format!("{}->_present.{} = 1;", var, self.c_name));
            }
        }

        if !init_lines.is_empty() {
            cw.nl();
            for line in &init_lines {
                cw.p(line);
            }
        }

        for line in &lines {
            cw.p(line);
        }
        cw.block_end("");
        Ok(true)
    }

    /// Reclamation lines for this member.
    pub fn free_lines(
        &self,
        family: &Family,
        ri: &RenderInfo,
        var: &str,
        ref_: &str,
    ) -> Result<Vec<String>, String> {
        if self.multi {
            if crate::ir::is_scalar_type(&self.attr_type) || self.attr_type == "binary" {
                return Ok(vec![format!("free({}->{}{});", var, ref_, self.c_name)]);
            } else if self.attr_type == "string" {
                return Ok(vec![
                    format!("for (i = 0; i < {}->{}_count.{}; i++)", var, ref_, self.c_name),
                    format!("free({}->{}{}[i]);", var, ref_, self.c_name),
                    format!("free({}->{}{});", var, ref_, self.c_name),
                ]);
            } else if self.attr_type == "nest" {
                return Ok(vec![
                    format!("for (i = 0; i < {}->{}_count.{}; i++)", var, ref_, self.c_name),
                    format!(
                        "{}_free(&{}->{}{}[i]);",
                        self.nested().render_name,
                        var,
                        ref_,
                        self.c_name
                    ),
                    format!("free({}->{}{});", var, ref_, self.c_name),
                ]);
            }
            return Err(format!(
                "Free of MultiAttr sub-type {} not supported yet",
                self.attr_type
            ));
        }
        match self.kind {
            AttrKind::Nest | AttrKind::SubMessage => {
                let mut lines = Vec::new();
                let mut at = "&";
                if self.is_recursive_for_op(family, ri) {
                    at = "";
                    lines.push(format!("if ({}->{}{})", var, ref_, self.c_name));
                }
                lines.push(format!(
                    "{}_free({}{}->{}{});",
                    self.nested().render_name,
                    at,
                    var,
                    ref_,
                    self.c_name
                ));
                Ok(lines)
            }
            _ => {
                if matches!(self.presence_type(), Presence::Count | Presence::Len) {
                    Ok(vec![format!("free({}->{}{});", var, ref_, self.c_name)])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn emit_free(
        &self,
        family: &Family,
        ri: &RenderInfo,
        cw: &mut CodeWriter,
        var: &str,
        ref_: &str,
    ) -> Result<(), String> {
        for line in self.free_lines(family, ri, var, ref_)? {
            cw.p(&line);
        }
        Ok(())
    }

    fn setter_lines(&self, member: &str, presence: &str) -> Result<Vec<String>, String> {
        if self.multi || self.kind == AttrKind::ArrayNest {
            return Ok(vec![
                format!("{} = {};", member, self.c_name),
                format!("{} = n_{};", presence, self.c_name),
            ]);
        }
        match self.kind {
            AttrKind::Scalar => Ok(vec![format!("{} = {};", member, self.c_name)]),
            AttrKind::Flag => Ok(vec![]),
            AttrKind::String => Ok(vec![
                format!("{} = strlen({});", presence, self.c_name),
                format!("{} = malloc({} + 1);", member, presence),
                format!("memcpy({}, {}, {});", member, self.c_name, presence),
                format!("{}[{}] = 0;", member, presence),
            ]),
            AttrKind::Binary | AttrKind::BinaryStruct => Ok(vec![
                format!("{} = len;", presence),
                format!("{} = malloc({});", member, presence),
                format!("memcpy({}, {}, {});", member, self.c_name, presence),
            ]),
            AttrKind::BinaryScalarArray => {
                let sub = self.sub_type.as_deref().unwrap_or_default();
                Ok(vec![
                    format!("{} = count;", presence),
                    format!("count *= sizeof(__{});", sub),
                    format!("{} = malloc(count);", member),
                    format!("memcpy({}, {}, count);", member, self.c_name),
                ])
            }
            AttrKind::Bitfield32 => Ok(vec![format!(
                "memcpy(&{}, {}, sizeof(struct nla_bitfield32));",
                member, self.c_name
            )]),
            _ => Err(format!(
                "Setter not implemented for class type {}",
                self.attr_type
            )),
        }
    }

    /// User-side setter helper; nests recurse into their members.
    #[allow(clippy::too_many_arguments)]
    pub fn setter(
        &self,
        family: &Family,
        ri: &RenderInfo,
        cw: &mut CodeWriter,
        direction: Option<Direction>,
        deref: bool,
        ref_: &[String],
        var: &str,
    ) -> Result<(), String> {
        if !self.multi {
            match self.kind {
                AttrKind::Unused | AttrKind::Pad => return Ok(()),
                AttrKind::Nest | AttrKind::SubMessage => {
                    let nested = self.nested().name.clone();
                    let mut sub_ref = ref_.to_vec();
                    sub_ref.push(self.c_name.clone());
                    let pns = family
                        .pure_nested_structs
                        .get(&nested)
                        .ok_or_else(|| format!("unresolved nested set '{}'", nested))?;
                    for attr in pns.member_list(family) {
                        if attr.is_recursive(family) {
                            continue;
                        }
                        attr.setter(family, ri, cw, direction, deref, &sub_ref, var)?;
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        let mut ref_path: Vec<String> = ref_.to_vec();
        ref_path.push(self.c_name.clone());
        let member = format!("{}->{}", var, ref_path.join("."));

        let mut local_vars = Vec::new();
        if self.free_needs_iter() {
            local_vars.push("unsigned int i;".to_string());
        }

        let mut code = Vec::new();
        let mut presence = String::new();
        for i in 0..ref_path.len() {
            let mut prefix = ref_path[..i].join(".");
            if !prefix.is_empty() {
                prefix.push('.');
            }
            presence = format!("{}->{}_present.{}", var, prefix, ref_path[i]);
            // Every layer below the last is a nest, so it uses bit
            // presence; the last layer is self and may be complex.
            if i == ref_path.len() - 1 && self.presence_type() != Presence::Present {
                presence = format!(
                    "{}->{}_{}.{}",
                    var,
                    prefix,
                    self.presence_type().tag(),
                    ref_path[i]
                );
                continue;
            }
            code.push(format!("{} = 1;", presence));
        }

        let mut free_ref = ref_path[..ref_path.len() - 1].join(".");
        if !free_ref.is_empty() {
            free_ref.push('.');
        }
        code.extend(self.free_lines(family, ri, var, &free_ref)?);
        code.extend(self.setter_lines(&member, &presence)?);

        let mut func_name = format!(
            "{}_set_{}",
            op_prefix(family, ri, direction, deref),
            ref_path.join("_")
        );
        let free = code.iter().any(|x| x.contains("free("));
        let alloc = code.iter().any(|x| x.contains("alloc("));
        if free && !alloc {
            func_name = format!("__{}", func_name);
        }

        let mut args = vec![format!(
            "{} *{}",
            type_name(family, ri, direction, deref),
            var
        )];
        args.extend(self.arg_member(family, ri)?);
        cw.write_func("static inline void", &func_name, &code, &args, local_vars);
        Ok(())
    }
}
