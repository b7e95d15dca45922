//! Derived shapes fed to the emitter: the per-attribute-set struct
//! layout and the per-operation rendering context.

use indexmap::IndexSet;

use crate::ir::{Attr, AttrKind, Family, OpMode, Operation};
use crate::names::c_lower;

/// Which side of the generated code a render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Reply,
}

impl Direction {
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Request => "_req",
            Direction::Reply => "_rsp",
        }
    }

    pub fn other(self) -> Direction {
        match self {
            Direction::Request => Direction::Reply,
            Direction::Reply => Direction::Request,
        }
    }
}

/// Suffix for an optional direction; none means a nested (space-level)
/// type that belongs to no direction.
pub fn dir_suffix(direction: Option<Direction>) -> &'static str {
    direction.map(Direction::suffix).unwrap_or("")
}

/// The C struct generated for one attribute set (or a filtered view of
/// it, when built from an operation's attribute list).
#[derive(Debug, Clone)]
pub struct StructShape {
    pub space_name: String,
    /// `struct xyz` of the fixed header prepended to the payload.
    pub fixed_header: Option<String>,
    /// Sub-message name when this struct was synthesized from one.
    pub submsg: Option<String>,
    /// True when reached only through nesting (built from the whole set).
    pub nested: bool,
    pub render_name: String,
    pub struct_name: String,
    pub ptr_name: String,
    inherited_raw: Vec<String>,
    /// Inherited scalar arguments, lower-cased and sorted.
    pub inherited: Vec<String>,
    /// Attr sets contained directly or transitively.
    pub child_nests: IndexSet<String>,
    pub request: bool,
    pub reply: bool,
    pub recursive: bool,
    pub in_multi_val: bool,
    /// Member attribute names, in emission order.
    pub members: Vec<String>,
    /// Name of the highest-valued member.
    pub attr_max_name: Option<String>,
}

impl StructShape {
    pub fn new(
        family: &Family,
        space_name: &str,
        type_list: Option<&[String]>,
        fixed_header: Option<&str>,
        inherited: Option<Vec<String>>,
        submsg: Option<&str>,
    ) -> Result<StructShape, String> {
        let attr_set = family.attr_set(space_name)?;

        let nested = type_list.is_none();
        let members: Vec<String> = match type_list {
            Some(list) => {
                for name in list {
                    if !attr_set.attrs.contains_key(name) {
                        return Err(format!(
                            "attribute '{}' not in set '{}'",
                            name, space_name
                        ));
                    }
                }
                list.to_vec()
            }
            None => attr_set.attrs.keys().cloned().collect(),
        };

        let render_name = family.render_name_for_set(space_name);
        let mut struct_name = format!("struct {}", render_name);
        if nested && family.consts.contains_key(space_name) {
            struct_name.push('_');
        }
        let ptr_name = format!("{} *", struct_name);

        let mut max_val = 0;
        let mut attr_max_name = None;
        for name in &members {
            let attr = &attr_set.attrs[name];
            if attr.value >= max_val {
                max_val = attr.value;
                attr_max_name = Some(name.clone());
            }
        }

        Ok(StructShape {
            space_name: space_name.to_string(),
            fixed_header: fixed_header.map(|h| format!("struct {}", c_lower(h))),
            submsg: submsg.map(str::to_string),
            nested,
            render_name,
            struct_name,
            ptr_name,
            inherited_raw: inherited.unwrap_or_default(),
            inherited: Vec::new(),
            child_nests: IndexSet::new(),
            request: false,
            reply: false,
            recursive: false,
            in_multi_val: false,
            members,
            attr_max_name,
        })
    }

    /// Record the inherited argument list; a nest reached twice must
    /// inherit the same members both times.
    pub fn set_inherited(&mut self, new_inherited: &IndexSet<String>) -> Result<(), String> {
        let mut have: Vec<&String> = self.inherited_raw.iter().collect();
        let mut want: Vec<&String> = new_inherited.iter().collect();
        have.sort();
        want.sort();
        if have != want {
            return Err(format!(
                "attribute set '{}' inherits different members through different paths",
                self.space_name
            ));
        }
        self.inherited = want.iter().map(|x| c_lower(x)).collect();
        Ok(())
    }

    pub fn member_list<'f>(&self, family: &'f Family) -> Vec<&'f Attr> {
        let set = &family.attr_sets[&self.space_name];
        self.members.iter().map(|n| &set.attrs[n]).collect()
    }

    pub fn attr_max<'f>(&self, family: &'f Family) -> Option<&'f Attr> {
        self.attr_max_name
            .as_ref()
            .map(|n| family.attr(&self.space_name, n))
    }

    /// Selectors of sub-message members that live outside this struct.
    pub fn external_selectors(&self, family: &Family) -> Vec<String> {
        let mut sels = Vec::new();
        for attr in self.member_list(family) {
            if attr.kind == AttrKind::SubMessage {
                if let Some(sel) = &attr.selector {
                    if sel.external {
                        sels.push(sel.name.clone());
                    }
                }
            }
        }
        sels
    }

    pub fn free_needs_iter(&self, family: &Family) -> bool {
        self.member_list(family)
            .iter()
            .any(|a| a.free_needs_iter())
    }
}

/// Everything the emitter needs to render one operation in one mode.
#[derive(Debug, Clone)]
pub struct RenderInfo {
    pub ku_space: Space,
    pub op_mode: Option<OpMode>,
    pub op_name: Option<String>,
    pub attr_set: String,
    pub fixed_hdr_len: String,
    pub type_consistent: bool,
    pub type_oneside: bool,
    pub type_name: String,
    pub type_name_conflict: bool,
    pub request: Option<StructShape>,
    pub reply: Option<StructShape>,
}

impl RenderInfo {
    pub fn for_op(
        family: &Family,
        ku_space: Space,
        op: &Operation,
        op_mode: OpMode,
    ) -> Result<RenderInfo, String> {
        RenderInfo::new(family, ku_space, Some(op), Some(op_mode), None)
    }

    pub fn for_set(
        family: &Family,
        ku_space: Space,
        attr_set: &str,
    ) -> Result<RenderInfo, String> {
        RenderInfo::new(family, ku_space, None, None, Some(attr_set))
    }

    fn new(
        family: &Family,
        ku_space: Space,
        op: Option<&Operation>,
        op_mode: Option<OpMode>,
        attr_set: Option<&str>,
    ) -> Result<RenderInfo, String> {
        let fixed_hdr = op.and_then(|o| o.fixed_header.as_deref());
        let mut fixed_hdr_len = "ys->family->hdr_len".to_string();
        if let (Some(op), Some(hdr)) = (op, fixed_hdr) {
            if Some(hdr) != family.fixed_header.as_deref() {
                if family.is_classic() {
                    fixed_hdr_len = format!("sizeof(struct {})", c_lower(hdr));
                } else {
                    return Err(format!(
                        "per-op fixed header not supported for '{}'",
                        op.name
                    ));
                }
            }
        }

        // 'do' and 'dump' response parsing is identical when the reply
        // blocks agree.
        let mut type_consistent = true;
        let mut type_oneside = false;
        if let Some(op) = op {
            if op_mode != Some(OpMode::Do) && op.has_mode(OpMode::Dump) {
                if op.has_mode(OpMode::Do) {
                    let do_reply = op.reply_of(OpMode::Do);
                    let dump_reply = op.reply_of(OpMode::Dump);
                    if do_reply.is_some() != dump_reply.is_some() {
                        type_consistent = false;
                    } else if do_reply.is_some() && do_reply != dump_reply {
                        type_consistent = false;
                    }
                } else {
                    type_oneside = true;
                }
            }
        }

        let attr_set_name = match attr_set {
            Some(s) => s.to_string(),
            None => op
                .and_then(|o| o.attribute_set.clone())
                .ok_or_else(|| "operation has no attribute-set".to_string())?,
        };

        let mut type_name_conflict = false;
        let type_name = match op {
            Some(op) => c_lower(&op.name),
            None => {
                let tn = c_lower(&attr_set_name);
                if family.consts.contains_key(&attr_set_name) {
                    type_name_conflict = true;
                }
                tn
            }
        };

        let mut request = None;
        let mut reply = None;
        if let (Some(op), Some(mode)) = (op, op_mode) {
            let struct_mode = if mode == OpMode::Notify {
                if op.has_mode(OpMode::Do) {
                    OpMode::Do
                } else {
                    OpMode::Dump
                }
            } else {
                mode
            };

            let req_list: Vec<String> = op
                .request_of(struct_mode)
                .map(|d| d.attributes.clone())
                .unwrap_or_default();
            request = Some(StructShape::new(
                family,
                &attr_set_name,
                Some(&req_list),
                fixed_hdr,
                None,
                None,
            )?);

            let rsp_list: Vec<String> = op
                .reply_of(struct_mode)
                .map(|d| d.attributes.clone())
                .unwrap_or_default();
            reply = Some(StructShape::new(
                family,
                &attr_set_name,
                Some(&rsp_list),
                fixed_hdr,
                None,
                None,
            )?);

            if mode == OpMode::Event {
                let ev_list: Vec<String> = op
                    .spec
                    .event
                    .as_ref()
                    .map(|e| e.attributes.clone())
                    .unwrap_or_default();
                reply = Some(StructShape::new(
                    family,
                    &attr_set_name,
                    Some(&ev_list),
                    fixed_hdr,
                    None,
                    None,
                )?);
            }
        }

        Ok(RenderInfo {
            ku_space,
            op_mode,
            op_name: op.map(|o| o.name.clone()),
            attr_set: attr_set_name,
            fixed_hdr_len,
            type_consistent,
            type_oneside,
            type_name,
            type_name_conflict,
            request,
            reply,
        })
    }

    pub fn op<'f>(&self, family: &'f Family) -> Option<&'f Operation> {
        self.op_name.as_deref().map(|n| family.op(n))
    }

    /// The operation's block for the rendered mode (do or dump).
    pub fn op_mode_spec<'f>(&self, family: &'f Family) -> Option<&'f nlspec::OpModeSpec> {
        let op = self.op(family)?;
        match self.op_mode {
            Some(OpMode::Do) => op.spec.do_.as_ref(),
            Some(OpMode::Dump) => op.spec.dump.as_ref(),
            _ => None,
        }
    }

    pub fn mode_has_request(&self, family: &Family) -> bool {
        self.op_mode_spec(family)
            .is_some_and(|m| m.request.is_some())
    }

    pub fn mode_has_reply(&self, family: &Family) -> bool {
        match self.op_mode {
            Some(OpMode::Event) => true,
            _ => self.op_mode_spec(family).is_some_and(|m| m.reply.is_some()),
        }
    }

    pub fn request(&self) -> &StructShape {
        self.request.as_ref().expect("render info has no request")
    }

    pub fn reply(&self) -> &StructShape {
        self.reply.as_ref().expect("render info has no reply")
    }

    pub fn type_empty(&self, shape: &StructShape) -> bool {
        shape.members.is_empty()
            && self
                .request
                .as_ref()
                .is_none_or(|r| r.fixed_header.is_none())
    }

    pub fn needs_nlflags(&self, family: &Family, direction: Option<Direction>) -> bool {
        self.op_mode == Some(OpMode::Do)
            && direction == Some(Direction::Request)
            && family.is_classic()
    }
}
