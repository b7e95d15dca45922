//! In-memory representation of a family spec, specialized for C output.
//!
//! Construction ([`Family::new`]) populates everything derivable from the
//! YAML alone: naming, id values, enum shapes, per-attribute checks.
//! The graph-level facts (root sets, nested struct shapes, reachability,
//! selectors, hooks) are derived afterwards by the resolver and stored
//! back on the family.

use indexmap::{IndexMap, IndexSet};
use nlspec::{
    AttrSetSpec, AttrSpec, ChecksSpec, ConstValue, Definition, FamilySpec, KernelFamilySpec,
    Limit, LoadedFamily, McastGroupSpec, OpModeSpec, OperationSpec, SubMessageSpec,
};

use crate::names::{c_lower, c_safe_name, c_upper, limit_to_number};
use crate::shape::StructShape;

pub const SCALARS: &[&str] = &[
    "u8", "u16", "u32", "u64", "s8", "s16", "s32", "s64", "uint", "sint",
];

pub fn is_scalar_type(t: &str) -> bool {
    SCALARS.contains(&t)
}

/// How an optional attribute records that it was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    None,
    Present,
    Len,
    Count,
}

impl Presence {
    pub fn tag(self) -> &'static str {
        match self {
            Presence::None => "",
            Presence::Present => "present",
            Presence::Len => "len",
            Presence::Count => "count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumType {
    Enum,
    Flags,
}

#[derive(Debug, Clone)]
pub struct EnumEntry {
    pub name: String,
    pub c_name: String,
    pub value: i64,
    pub value_change: bool,
    pub doc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnumSet {
    pub name: String,
    pub render_name: String,
    /// `enum foo` when named, None when explicitly anonymous.
    pub enum_name: Option<String>,
    /// Whether the spec carried an `enum-name` key at all.
    pub enum_name_key: Option<Option<String>>,
    pub user_type: String,
    pub value_pfx: String,
    pub header: Option<String>,
    pub enum_cnt_name: Option<String>,
    pub enum_type: EnumType,
    pub entries: IndexMap<String, EnumEntry>,
    pub doc: Option<String>,
    pub render_max: bool,
    pub name_prefix_raw: Option<String>,
}

impl EnumSet {
    pub fn new(ident_name: &str, def: &Definition) -> EnumSet {
        let render_name = c_lower(&format!("{}-{}", ident_name, def.name));

        let enum_name = match &def.enum_name {
            Some(Some(n)) => Some(format!("enum {}", c_lower(n))),
            Some(None) => None,
            None => Some(format!("enum {}", render_name)),
        };
        let user_type = enum_name.clone().unwrap_or_else(|| "int".to_string());

        let value_pfx = def
            .name_prefix
            .clone()
            .unwrap_or_else(|| format!("{}-{}-", ident_name, def.name));

        let enum_type = if def.def_type == "flags" {
            EnumType::Flags
        } else {
            EnumType::Enum
        };

        let values = nlspec::assign_enum_values(def);
        let mut entries = IndexMap::new();
        let mut prev: Option<i64> = None;
        for (entry, &value) in def.entries.iter().zip(values.iter()) {
            let mut value_change = match prev {
                Some(p) => value != p + 1,
                None => value != 0,
            };
            value_change = value_change || enum_type == EnumType::Flags;
            prev = Some(value);
            entries.insert(
                entry.name().to_string(),
                EnumEntry {
                    name: entry.name().to_string(),
                    c_name: c_upper(&format!("{}{}", value_pfx, entry.name())),
                    value,
                    value_change,
                    doc: entry.doc().map(str::to_string),
                },
            );
        }

        EnumSet {
            name: def.name.clone(),
            render_name,
            enum_name,
            enum_name_key: def.enum_name.clone(),
            user_type,
            value_pfx,
            header: def.header.clone(),
            enum_cnt_name: def.enum_cnt_name.clone(),
            enum_type,
            entries,
            doc: def.doc.clone(),
            render_max: def.render_max,
            name_prefix_raw: def.name_prefix.clone(),
        }
    }

    /// Contiguous value range, or None for a sparse set.
    pub fn value_range(&self) -> Option<(i64, i64)> {
        let low = self.entries.values().map(|e| e.value).min()?;
        let high = self.entries.values().map(|e| e.value).max()?;
        if high - low + 1 != self.entries.len() as i64 {
            return None;
        }
        Some((low, high))
    }

    pub fn user_value(&self, entry: &EnumEntry, as_flags: bool) -> i128 {
        if self.enum_type == EnumType::Flags || as_flags {
            1i128 << entry.value
        } else {
            entry.value as i128
        }
    }

    pub fn get_mask(&self, as_flags: bool) -> i128 {
        self.entries
            .values()
            .map(|e| self.user_value(e, as_flags))
            .sum()
    }

    pub fn has_entry_doc(&self) -> bool {
        self.entries.values().any(|e| e.doc.is_some())
    }

    pub fn has_doc(&self) -> bool {
        self.doc.is_some() || self.has_entry_doc()
    }
}

/// A `definitions` entry: the raw form plus the enum shape when it is one.
#[derive(Debug, Clone)]
pub struct Const {
    pub def: Definition,
    pub enum_set: Option<EnumSet>,
}

impl Const {
    pub fn header(&self) -> Option<&str> {
        self.def.header.as_deref()
    }

    pub fn int_value(&self) -> Option<i128> {
        match self.def.value {
            Some(ConstValue::Int(v)) => Some(v as i128),
            _ => None,
        }
    }
}

/// Reference from an attribute to the set or sub-message it nests into.
#[derive(Debug, Clone)]
pub struct NestedRef {
    pub name: String,
    pub render_name: String,
    pub struct_type: String,
}

/// Selector of a sub-message attribute: a sibling attribute, or an
/// external value threaded in from the enclosing layer.
#[derive(Debug, Clone)]
pub struct SelectorRef {
    pub name: String,
    pub external: bool,
}

/// Derived validation checks of an attribute.
#[derive(Debug, Clone, Default)]
pub struct Checks {
    pub min: Option<Limit>,
    pub max: Option<Limit>,
    pub range: bool,
    pub full_range: bool,
    pub sparse: bool,
    pub flags_mask: Option<String>,
    pub exact_len: Option<Limit>,
    pub min_len: Option<Limit>,
    pub max_len: Option<Limit>,
    pub unterminated_ok: bool,
}

impl Checks {
    fn from_spec(spec: &ChecksSpec) -> Checks {
        Checks {
            min: spec.min.clone(),
            max: spec.max.clone(),
            range: false,
            full_range: false,
            sparse: false,
            flags_mask: spec.flags_mask.clone(),
            exact_len: spec.exact_len.clone(),
            min_len: spec.min_len.clone(),
            max_len: spec.max_len.clone(),
            unterminated_ok: spec.unterminated_ok,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Min,
    Max,
    ExactLen,
    MinLen,
    MaxLen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Unused,
    Pad,
    Flag,
    Scalar,
    String,
    Binary,
    BinaryStruct,
    BinaryScalarArray,
    Bitfield32,
    Nest,
    ArrayNest,
    NestTypeValue,
    SubMessage,
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub name: String,
    pub c_name: String,
    pub value: u64,
    pub attr_set: String,
    pub attr_type: String,
    pub kind: AttrKind,
    /// Wrapped as a repeated attribute (`multi-attr: true`).
    pub multi: bool,
    pub checks: Checks,
    pub yaml_checks: ChecksSpec,
    pub request: bool,
    pub reply: bool,
    pub is_selector: bool,
    pub enum_name: String,
    pub nested: Option<NestedRef>,
    pub byte_order: Option<String>,
    pub sub_type: Option<String>,
    pub enum_ref: Option<String>,
    pub struct_ref: Option<String>,
    pub type_value: Vec<String>,
    pub selector: Option<SelectorRef>,
    pub fixed_header: Option<String>,
    pub doc: Option<String>,
    pub is_bitfield: bool,
    pub is_auto_scalar: bool,
    /// Resolved C type of a scalar member.
    pub type_name: String,
}

impl Attr {
    pub fn is_multi_val(&self) -> bool {
        self.multi || self.kind == AttrKind::ArrayNest
    }

    pub fn presence_type(&self) -> Presence {
        if self.multi {
            return Presence::Count;
        }
        match self.kind {
            AttrKind::Unused | AttrKind::Pad => Presence::None,
            AttrKind::String | AttrKind::Binary | AttrKind::BinaryStruct => Presence::Len,
            AttrKind::BinaryScalarArray | AttrKind::ArrayNest => Presence::Count,
            _ => Presence::Present,
        }
    }

    pub fn nested(&self) -> &NestedRef {
        self.nested.as_ref().expect("attribute has no nested ref")
    }

    fn check_value(&self, which: LimitKind) -> Option<&Limit> {
        match which {
            LimitKind::Min => self.checks.min.as_ref(),
            LimitKind::Max => self.checks.max.as_ref(),
            LimitKind::ExactLen => self.checks.exact_len.as_ref(),
            LimitKind::MinLen => self.checks.min_len.as_ref(),
            LimitKind::MaxLen => self.checks.max_len.as_ref(),
        }
    }

    /// Numeric value of a check, resolving named constants and width
    /// shorthands; `default` fills in when the check is absent.
    pub fn get_limit(
        &self,
        consts: &IndexMap<String, Const>,
        which: LimitKind,
        default: Option<i128>,
    ) -> Result<Option<i128>, String> {
        let limit = match self.check_value(which) {
            Some(l) => l.clone(),
            None => return Ok(default),
        };
        resolve_limit(consts, &limit).map(Some)
    }

    /// C spelling of a check value: the number itself, the define of a
    /// named constant, or the upper-cased width shorthand.
    pub fn get_limit_str(
        &self,
        family: &Family,
        which: LimitKind,
        suffix: &str,
    ) -> Result<String, String> {
        let limit = match self.check_value(which) {
            Some(l) => l,
            None => return Ok(String::new()),
        };
        match limit {
            Limit::Int(v) => Ok(format!("{}{}", v, suffix)),
            Limit::Name(name) => {
                if let Some(c) = family.consts.get(name) {
                    if c.header().is_some() {
                        Ok(c_upper(name))
                    } else {
                        Ok(c_upper(&format!("{}-{}", family.name, name)))
                    }
                } else {
                    limit_to_number(name)?;
                    Ok(c_upper(name))
                }
            }
        }
    }
}

fn resolve_limit(consts: &IndexMap<String, Const>, limit: &Limit) -> Result<i128, String> {
    match limit {
        Limit::Int(v) => Ok(*v as i128),
        Limit::Name(name) => {
            if let Some(c) = consts.get(name) {
                c.int_value()
                    .ok_or_else(|| format!("constant '{}' has no integer value", name))
            } else {
                limit_to_number(name)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttrSet {
    pub name: String,
    pub subset_of: Option<String>,
    pub name_prefix: String,
    pub max_name: String,
    pub cnt_name: String,
    pub c_name: String,
    pub header: Option<String>,
    pub enum_name_key: Option<Option<String>>,
    pub doc: Option<String>,
    pub attrs: IndexMap<String, Attr>,
}

impl AttrSet {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpMode {
    Do,
    Dump,
    Notify,
    Event,
}

impl OpMode {
    pub fn key(self) -> &'static str {
        match self {
            OpMode::Do => "do",
            OpMode::Dump => "dump",
            OpMode::Notify => "notify",
            OpMode::Event => "event",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub render_name: String,
    pub enum_name: String,
    pub req_value: Option<u64>,
    pub rsp_value: Option<u64>,
    pub is_call: bool,
    pub is_async: bool,
    pub has_ntf: bool,
    pub dual_policy: bool,
    pub fixed_header: Option<String>,
    pub attribute_set: Option<String>,
    pub spec: OperationSpec,
}

impl Operation {
    /// Unified-model id; None only for directional notifications.
    pub fn value(&self) -> Option<u64> {
        self.req_value
    }

    pub fn mode(&self, mode: OpMode) -> Option<&OpModeSpec> {
        match mode {
            OpMode::Do => self.spec.do_.as_ref(),
            OpMode::Dump => self.spec.dump.as_ref(),
            _ => None,
        }
    }

    pub fn has_mode(&self, mode: OpMode) -> bool {
        match mode {
            OpMode::Do => self.spec.do_.is_some(),
            OpMode::Dump => self.spec.dump.is_some(),
            OpMode::Notify => self.spec.notify.is_some(),
            OpMode::Event => self.spec.event.is_some(),
        }
    }

    pub fn request_of(&self, mode: OpMode) -> Option<&nlspec::OpDirectionSpec> {
        self.mode(mode).and_then(|m| m.request.as_ref())
    }

    pub fn reply_of(&self, mode: OpMode) -> Option<&nlspec::OpDirectionSpec> {
        self.mode(mode).and_then(|m| m.reply.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RootSet {
    pub request: IndexSet<String>,
    pub reply: IndexSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub pre_do: Vec<String>,
    pub post_do: Vec<String>,
    pub pre_dump: Vec<String>,
    pub post_dump: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Family {
    pub license: String,
    pub raw: FamilySpec,
    pub name: String,
    pub ident_name: String,
    pub c_name: String,
    pub proto: String,
    pub msg_id_model: String,
    pub fam_key: String,
    pub ver_key: String,
    pub uapi_header: String,
    pub uapi_header_name: String,
    pub fixed_header: Option<String>,
    pub op_prefix: String,
    pub async_op_prefix: String,
    pub consts: IndexMap<String, Const>,
    pub attr_sets: IndexMap<String, AttrSet>,
    pub sub_msgs: IndexMap<String, SubMessageSpec>,
    pub msgs: IndexMap<String, Operation>,
    pub ops: Vec<String>,
    pub ntfs: Vec<String>,
    pub req_by_value: IndexMap<u64, String>,
    pub rsp_by_value: IndexMap<u64, String>,
    pub kernel_policy: String,
    pub mcast_groups: Vec<McastGroupSpec>,
    pub kernel_family: KernelFamilySpec,
    // Filled in by the resolver.
    pub root_sets: IndexMap<String, RootSet>,
    pub pure_nested_structs: IndexMap<String, StructShape>,
    pub hooks: Hooks,
    pub global_policy: Vec<String>,
    pub global_policy_set: Option<String>,
}

impl Family {
    pub fn new(loaded: LoadedFamily) -> Result<Family, String> {
        let LoadedFamily {
            license,
            family: raw,
            op_ids,
        } = loaded;

        let name = raw.name.clone();
        let ident_name = raw.ident_name();
        let c_name = c_lower(&ident_name);
        let proto = raw.protocol.clone();
        let is_classic = raw.is_classic();

        let fam_key = c_upper(
            raw.c_family_name
                .as_deref()
                .unwrap_or(&format!("{}_FAMILY_NAME", raw.name)),
        );
        let ver_key = c_upper(
            raw.c_version_name
                .as_deref()
                .unwrap_or(&format!("{}_FAMILY_VERSION", raw.name)),
        );

        let uapi_header = raw
            .uapi_header
            .clone()
            .unwrap_or_else(|| format!("linux/{}.h", ident_name));
        let uapi_header_name = uapi_header
            .strip_prefix("linux/")
            .and_then(|h| h.strip_suffix(".h"))
            .map(str::to_string)
            .unwrap_or_else(|| ident_name.clone());

        let op_prefix = c_upper(
            raw.operations
                .name_prefix
                .as_deref()
                .unwrap_or(&format!("{}-cmd-", raw.name)),
        );
        let async_op_prefix = match &raw.operations.async_prefix {
            Some(p) => c_upper(p),
            None => op_prefix.clone(),
        };

        let mut consts = IndexMap::new();
        for def in &raw.definitions {
            let enum_set = if def.def_type == "enum" || def.def_type == "flags" {
                Some(EnumSet::new(&ident_name, def))
            } else {
                None
            };
            consts.insert(
                def.name.clone(),
                Const {
                    def: def.clone(),
                    enum_set,
                },
            );
        }

        let mut attr_sets = IndexMap::new();
        for set_spec in &raw.attribute_sets {
            let set = build_attr_set(&raw, &consts, &ident_name, &c_name, is_classic, set_spec)?;
            attr_sets.insert(set.name.clone(), set);
        }

        let mut sub_msgs = IndexMap::new();
        for sm in &raw.sub_messages {
            sub_msgs.insert(sm.name.clone(), sm.clone());
        }

        let mut msgs = IndexMap::new();
        for (op_spec, ids) in raw.operations.list.iter().zip(op_ids.iter()) {
            let is_call = op_spec.is_call();
            let is_async = op_spec.is_async();
            let enum_name = if !is_async {
                format!("{}{}", op_prefix, c_upper(&op_spec.name))
            } else {
                format!("{}{}", async_op_prefix, c_upper(&op_spec.name))
            };
            let dual_policy = op_spec.do_.as_ref().is_some_and(|m| m.request.is_some())
                && op_spec.dump.as_ref().is_some_and(|m| m.request.is_some());
            let op = Operation {
                name: op_spec.name.clone(),
                render_name: c_lower(&format!("{}_{}", ident_name, op_spec.name)),
                enum_name,
                req_value: ids.req,
                rsp_value: ids.rsp,
                is_call,
                is_async,
                has_ntf: false,
                dual_policy,
                fixed_header: op_spec
                    .fixed_header
                    .clone()
                    .or_else(|| raw.fixed_header().map(str::to_string)),
                attribute_set: op_spec.attribute_set.clone(),
                spec: op_spec.clone(),
            };
            msgs.insert(op.name.clone(), op);
        }

        let mut ops = Vec::new();
        let mut ntfs = Vec::new();
        let mut req_by_value = IndexMap::new();
        let mut rsp_by_value = IndexMap::new();
        for op in msgs.values() {
            if let Some(v) = op.req_value {
                req_by_value.entry(v).or_insert_with(|| op.name.clone());
            }
            if let Some(v) = op.rsp_value {
                rsp_by_value.entry(v).or_insert_with(|| op.name.clone());
            }
            if !op.is_async && op.attribute_set.is_some() {
                ops.push(op.name.clone());
            } else if op.is_async {
                ntfs.push(op.name.clone());
            }
        }

        let kernel_policy = raw
            .kernel_policy
            .clone()
            .unwrap_or_else(|| "split".to_string());

        Ok(Family {
            license,
            name,
            ident_name,
            c_name,
            proto,
            msg_id_model: raw.msg_id_model().to_string(),
            fam_key,
            ver_key,
            uapi_header,
            uapi_header_name,
            fixed_header: raw.fixed_header().map(str::to_string),
            op_prefix,
            async_op_prefix,
            consts,
            attr_sets,
            sub_msgs,
            msgs,
            ops,
            ntfs,
            req_by_value,
            rsp_by_value,
            kernel_policy,
            mcast_groups: raw.mcast_groups.list.clone(),
            kernel_family: raw.kernel_family.clone(),
            root_sets: IndexMap::new(),
            pure_nested_structs: IndexMap::new(),
            hooks: Hooks::default(),
            global_policy: Vec::new(),
            global_policy_set: None,
            raw,
        })
    }

    pub fn is_classic(&self) -> bool {
        self.proto == "netlink-raw"
    }

    pub fn op(&self, name: &str) -> &Operation {
        &self.msgs[name]
    }

    pub fn attr_set(&self, name: &str) -> Result<&AttrSet, String> {
        self.attr_sets
            .get(name)
            .ok_or_else(|| format!("unknown attribute set '{}'", name))
    }

    pub fn attr(&self, set: &str, name: &str) -> &Attr {
        &self.attr_sets[set].attrs[name]
    }

    /// Call operations, in declaration order.
    pub fn ops_iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter().map(|n| &self.msgs[n])
    }

    /// Notifications and events, in declaration order.
    pub fn ntfs_iter(&self) -> impl Iterator<Item = &Operation> {
        self.ntfs.iter().map(|n| &self.msgs[n])
    }

    pub fn has_ntfs(&self) -> bool {
        !self.ntfs.is_empty()
    }

    /// Naming stem of the struct generated for an attribute set.
    pub fn render_name_for_set(&self, space_name: &str) -> String {
        if self.name == c_lower(space_name) {
            c_lower(&self.ident_name)
        } else {
            c_lower(&format!("{}-{}", self.ident_name, space_name))
        }
    }
}

fn build_attr_set(
    raw: &FamilySpec,
    consts: &IndexMap<String, Const>,
    ident_name: &str,
    family_c_name: &str,
    is_classic: bool,
    spec: &AttrSetSpec,
) -> Result<AttrSet, String> {
    let (name_prefix, max_name, cnt_name) = match &spec.subset_of {
        None => {
            let pfx = match &spec.name_prefix {
                Some(p) => p.clone(),
                None if spec.name == raw.name => format!("{}-a-", ident_name),
                None => format!("{}-a-{}-", ident_name, spec.name),
            };
            let name_prefix = c_upper(&pfx);
            let max_name = c_upper(
                spec.attr_max_name
                    .as_deref()
                    .unwrap_or(&format!("{}max", pfx)),
            );
            let cnt_name = c_upper(
                spec.attr_cnt_name
                    .as_deref()
                    .unwrap_or(&format!("__{}max", pfx)),
            );
            (name_prefix, max_name, cnt_name)
        }
        Some(parent_name) => {
            let parent = raw
                .attribute_sets
                .iter()
                .find(|s| &s.name == parent_name)
                .ok_or_else(|| {
                    format!(
                        "attribute set '{}' is a subset of unknown set '{}'",
                        spec.name, parent_name
                    )
                })?;
            let parent_set = build_attr_set_names(raw, ident_name, parent);
            (parent_set.0, parent_set.1, parent_set.2)
        }
    };

    let parent_spec = spec.subset_of.as_ref().map(|p| {
        raw.attribute_sets
            .iter()
            .find(|s| &s.name == p)
            .expect("subset parent checked above")
    });
    let values = nlspec::assign_attr_values(spec, parent_spec).map_err(|e| e.to_string())?;

    if let Some(parent) = parent_spec {
        for attr_spec in &spec.attributes {
            let real = parent
                .attributes
                .iter()
                .find(|a| a.name == attr_spec.name)
                .ok_or_else(|| {
                    format!(
                        "attribute '{}' of subset '{}' not found in '{}'",
                        attr_spec.name, spec.name, parent.name
                    )
                })?;
            if attr_spec.checks != real.checks {
                return Err(format!(
                    "Overriding checks not supported by codegen, yet ('{}' in subset '{}')",
                    attr_spec.name, spec.name
                ));
            }
        }
    }

    let mut c_name = c_safe_name(&spec.name);
    if c_name == family_c_name {
        c_name = String::new();
    }

    let mut attrs = IndexMap::new();
    let mut seen_values = std::collections::HashSet::new();
    for (attr_spec, &value) in spec.attributes.iter().zip(values.iter()) {
        if spec.subset_of.is_none() && !seen_values.insert(value) {
            return Err(format!(
                "duplicate attribute value {} for '{}' in set '{}'",
                value, attr_spec.name, spec.name
            ));
        }
        let attr = build_attr(
            raw,
            consts,
            ident_name,
            is_classic,
            &spec.name,
            &name_prefix,
            attr_spec,
            value,
            None,
        )?;
        attrs.insert(attr.name.clone(), attr);
    }
    mark_selectors(&mut attrs);

    Ok(AttrSet {
        name: spec.name.clone(),
        subset_of: spec.subset_of.clone(),
        name_prefix,
        max_name,
        cnt_name,
        c_name,
        header: spec.header.clone(),
        enum_name_key: spec.enum_name.clone(),
        doc: spec.doc.clone(),
        attrs,
    })
}

fn build_attr_set_names(
    raw: &FamilySpec,
    ident_name: &str,
    spec: &AttrSetSpec,
) -> (String, String, String) {
    let pfx = match &spec.name_prefix {
        Some(p) => p.clone(),
        None if spec.name == raw.name => format!("{}-a-", ident_name),
        None => format!("{}-a-{}-", ident_name, spec.name),
    };
    (
        c_upper(&pfx),
        c_upper(
            spec.attr_max_name
                .as_deref()
                .unwrap_or(&format!("{}max", pfx)),
        ),
        c_upper(
            spec.attr_cnt_name
                .as_deref()
                .unwrap_or(&format!("__{}max", pfx)),
        ),
    )
}

/// Resolve sub-message selectors against the completed set and mark the
/// sibling attributes they point at.
fn mark_selectors(attrs: &mut IndexMap<String, Attr>) {
    let mut sibling_selectors = Vec::new();
    for attr in attrs.values_mut() {
        if attr.kind != AttrKind::SubMessage {
            continue;
        }
        if let Some(sel) = &mut attr.selector {
            // External until proven to be a sibling.
            sel.external = true;
            sibling_selectors.push(sel.name.clone());
        }
    }
    let names: IndexSet<String> = attrs.keys().cloned().collect();
    for attr in attrs.values_mut() {
        if let Some(sel) = &mut attr.selector {
            if names.contains(&sel.name) {
                sel.external = false;
            }
        }
    }
    for sel_name in sibling_selectors {
        if let Some(sel_attr) = attrs.get_mut(&sel_name) {
            sel_attr.is_selector = true;
        }
    }
}

/// Build one typed attribute, dispatching on the wire type tag.
#[allow(clippy::too_many_arguments)]
pub fn build_attr(
    raw: &FamilySpec,
    consts: &IndexMap<String, Const>,
    ident_name: &str,
    is_classic: bool,
    set_name: &str,
    set_prefix: &str,
    spec: &AttrSpec,
    value: u64,
    parent_submsg_enum: Option<&str>,
) -> Result<Attr, String> {
    let kind = match spec.attr_type.as_str() {
        t if is_scalar_type(t) => AttrKind::Scalar,
        "unused" => AttrKind::Unused,
        "pad" => AttrKind::Pad,
        "flag" => AttrKind::Flag,
        "string" => AttrKind::String,
        "binary" => {
            if spec.r#struct.is_some() {
                AttrKind::BinaryStruct
            } else if spec.sub_type.as_deref().is_some_and(is_scalar_type) {
                AttrKind::BinaryScalarArray
            } else {
                AttrKind::Binary
            }
        }
        "bitfield32" => AttrKind::Bitfield32,
        "nest" => AttrKind::Nest,
        "indexed-array" => match spec.sub_type.as_deref() {
            Some("binary") | Some("nest") | Some("u32") => AttrKind::ArrayNest,
            Some(sub) => {
                return Err(format!(
                    "attribute '{}': unsupported indexed-array sub-type '{}'",
                    spec.name, sub
                ));
            }
            None => {
                return Err(format!(
                    "attribute '{}': indexed-array requires a sub-type",
                    spec.name
                ));
            }
        },
        "nest-type-value" => AttrKind::NestTypeValue,
        "sub-message" => AttrKind::SubMessage,
        other => {
            return Err(format!(
                "attribute '{}': unknown type '{}'",
                spec.name, other
            ));
        }
    };

    let nested = spec.nested_ref().map(|nested_name| {
        let render_name = if nested_name == raw.name {
            c_lower(ident_name)
        } else {
            c_lower(&format!("{}_{}", ident_name, nested_name))
        };
        let struct_type = if consts.contains_key(nested_name) {
            format!("struct {}_", render_name)
        } else {
            format!("struct {}", render_name)
        };
        NestedRef {
            name: nested_name.to_string(),
            render_name,
            struct_type,
        }
    });

    let enum_name = if let Some(parent) = parent_submsg_enum {
        parent.to_string()
    } else if let Some(pfx) = &spec.name_prefix {
        c_upper(&format!("{}{}", pfx, spec.name))
    } else {
        c_upper(&format!("{}{}", set_prefix, spec.name))
    };

    let selector = if kind == AttrKind::SubMessage {
        let sel_name = spec.selector.clone().ok_or_else(|| {
            format!("sub-message attribute '{}' has no selector", spec.name)
        })?;
        Some(SelectorRef {
            name: sel_name,
            external: false,
        })
    } else {
        None
    };

    let mut attr = Attr {
        name: spec.name.clone(),
        c_name: c_safe_name(&spec.name),
        value,
        attr_set: set_name.to_string(),
        attr_type: spec.attr_type.clone(),
        kind,
        multi: spec.multi_attr,
        checks: Checks::from_spec(&spec.checks),
        yaml_checks: spec.checks.clone(),
        request: false,
        reply: false,
        is_selector: false,
        enum_name,
        nested,
        byte_order: spec.byte_order.clone(),
        sub_type: spec.sub_type.clone(),
        enum_ref: spec.r#enum.clone(),
        struct_ref: spec.r#struct.clone(),
        type_value: spec.type_value.clone(),
        selector,
        fixed_header: spec.fixed_header.clone(),
        doc: spec.doc.clone(),
        is_bitfield: false,
        is_auto_scalar: spec.attr_type == "uint" || spec.attr_type == "sint",
        type_name: String::new(),
    };

    if kind == AttrKind::Scalar {
        resolve_scalar(raw, consts, &mut attr, spec, is_classic)?;
    }

    Ok(attr)
}

/// Scalar-specific derivation: bitfield detection, the C type, and the
/// validation checks materialized from an enum binding.
fn resolve_scalar(
    _raw: &FamilySpec,
    consts: &IndexMap<String, Const>,
    attr: &mut Attr,
    spec: &AttrSpec,
    is_classic: bool,
) -> Result<(), String> {
    attr.is_bitfield = if spec.enum_as_flags {
        true
    } else if let Some(enum_name) = &spec.r#enum {
        let c = consts
            .get(enum_name)
            .ok_or_else(|| format!("attribute '{}': unknown enum '{}'", spec.name, enum_name))?;
        c.enum_set
            .as_ref()
            .map(|e| e.enum_type == EnumType::Flags)
            .unwrap_or(false)
    } else {
        false
    };

    attr.type_name = if !attr.is_bitfield && spec.r#enum.is_some() {
        let enum_name = spec.r#enum.as_ref().unwrap();
        consts[enum_name]
            .enum_set
            .as_ref()
            .map(|e| e.user_type.clone())
            .ok_or_else(|| format!("attribute '{}': '{}' is not an enum", spec.name, enum_name))?
    } else if attr.is_auto_scalar {
        format!("__{}64", &spec.attr_type[..1])
    } else {
        format!("__{}", spec.attr_type)
    };

    // Classic families have some funny enums; their checks are only
    // needed for kernel policies, which classic families don't get.
    if is_classic {
        return Ok(());
    }

    if let Some(enum_name) = &spec.r#enum {
        let enum_set = consts[enum_name]
            .enum_set
            .as_ref()
            .ok_or_else(|| format!("attribute '{}': '{}' is not an enum", spec.name, enum_name))?;
        match enum_set.value_range() {
            None => attr.checks.sparse = true,
            Some((low, high)) => {
                if attr.checks.min.is_none() && (low != 0 || spec.attr_type.starts_with('s')) {
                    attr.checks.min = Some(Limit::Int(low));
                }
                if attr.checks.max.is_none() {
                    attr.checks.max = Some(Limit::Int(high));
                }
            }
        }
    }

    if attr.checks.min.is_some() && attr.checks.max.is_some() {
        let min = attr.get_limit(consts, LimitKind::Min, None)?.unwrap();
        let max = attr.get_limit(consts, LimitKind::Max, None)?.unwrap();
        if min > max {
            return Err(format!(
                "invalid limit for '{}' min: {} max: {}",
                spec.name, min, max
            ));
        }
        attr.checks.range = true;
    }

    let a = attr.get_limit(consts, LimitKind::Min, Some(0))?.unwrap();
    let b = attr.get_limit(consts, LimitKind::Max, Some(0))?.unwrap();
    let low = a.min(b);
    let high = a.max(b);
    if low < 0 && spec.attr_type.starts_with('u') {
        return Err(format!(
            "invalid limit for '{}' negative limit for unsigned type",
            spec.name
        ));
    }
    if low < -32768 || high > 32767 {
        attr.checks.full_range = true;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn family_from(yaml: &str) -> Family {
        let text = format!("# SPDX-License-Identifier: test\n{}", yaml);
        let dir = std::env::temp_dir().join("nlgen-ir-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("fam-{}-{}.yaml", std::process::id(), n));
        std::fs::write(&path, text).unwrap();
        let loaded = nlspec::LoadedFamily::load(&path, &[]).unwrap();
        Family::new(loaded).unwrap()
    }

    #[test]
    fn enum_value_change_tracks_gaps() {
        let fam = family_from(
            "name: dummy\ndefinitions:\n  - name: vals\n    type: enum\n    entries:\n      - a\n      - b\n      - name: c\n        value: 9\n      - d\noperations:\n  list: []\n",
        );
        let e = fam.consts["vals"].enum_set.as_ref().unwrap();
        let ch: Vec<bool> = e.entries.values().map(|x| x.value_change).collect();
        assert_eq!(ch, vec![false, false, true, false]);
    }

    #[test]
    fn flags_enums_always_mark_value_change() {
        let fam = family_from(
            "name: dummy\ndefinitions:\n  - name: caps\n    type: flags\n    entries: [a, b, c]\noperations:\n  list: []\n",
        );
        let e = fam.consts["caps"].enum_set.as_ref().unwrap();
        assert!(e.entries.values().all(|x| x.value_change));
        assert_eq!(e.get_mask(false), 0b111);
    }

    #[test]
    fn scalar_enum_binding_materializes_range() {
        let fam = family_from(
            "name: dummy\ndefinitions:\n  - name: mode\n    type: enum\n    entries: [a, b, c]\nattribute-sets:\n  - name: main\n    attributes:\n      - name: the-mode\n        type: u32\n        enum: mode\noperations:\n  list: []\n",
        );
        let attr = fam.attr("main", "the-mode");
        assert!(!attr.checks.sparse);
        assert_eq!(attr.checks.min, None); // low == 0 on unsigned type
        assert_eq!(attr.checks.max, Some(Limit::Int(2)));
        assert!(!attr.checks.range);
    }

    #[test]
    fn sparse_enum_binding_sets_sparse() {
        let fam = family_from(
            "name: dummy\ndefinitions:\n  - name: colors\n    type: enum\n    entries:\n      - name: red\n        value: 1\n      - name: green\n        value: 2\n      - name: blue\n        value: 4\nattribute-sets:\n  - name: main\n    attributes:\n      - name: color\n        type: u32\n        enum: colors\noperations:\n  list: []\n",
        );
        assert!(fam.attr("main", "color").checks.sparse);
    }

    #[test]
    fn full_range_trips_past_s16() {
        let fam = family_from(
            "name: dummy\nattribute-sets:\n  - name: main\n    attributes:\n      - name: big\n        type: u32\n        checks:\n          min: 1\n          max: 100000\noperations:\n  list: []\n",
        );
        let attr = fam.attr("main", "big");
        assert!(attr.checks.range);
        assert!(attr.checks.full_range);
    }

    #[test]
    fn min_above_max_is_fatal() {
        let text = "# SPDX-License-Identifier: test\nname: dummy\nattribute-sets:\n  - name: main\n    attributes:\n      - name: bad\n        type: u32\n        checks:\n          min: 9\n          max: 3\noperations:\n  list: []\n";
        let dir = std::env::temp_dir().join("nlgen-ir-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("bad-{}.yaml", std::process::id()));
        std::fs::write(&path, text).unwrap();
        let loaded = nlspec::LoadedFamily::load(&path, &[]).unwrap();
        assert!(Family::new(loaded).is_err());
    }

    #[test]
    fn keyword_attr_names_are_escaped() {
        let fam = family_from(
            "name: dummy\nattribute-sets:\n  - name: main\n    attributes:\n      - name: union\n        type: u8\noperations:\n  list: []\n",
        );
        assert_eq!(fam.attr("main", "union").c_name, "union_");
    }
}
