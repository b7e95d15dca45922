//! Serde model for netlink family specs.
//!
//! The structs here mirror the YAML shape one to one and carry no derived
//! state. Value assignment (attribute ids, enum entry values, operation
//! ids) lives in the loader so that the raw tree stays a faithful image
//! of the input file.

use serde::Deserialize;
use serde::Deserializer;

/// A numeric limit that may be spelled as an integer, a named constant
/// from `definitions`, or a width shorthand like `u32-max` / `s16-min`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Limit {
    Int(i64),
    Name(String),
}

/// `checks` block of an attribute, exactly as written in the spec.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChecksSpec {
    pub min: Option<Limit>,
    pub max: Option<Limit>,
    pub exact_len: Option<Limit>,
    pub min_len: Option<Limit>,
    pub max_len: Option<Limit>,
    #[serde(default)]
    pub unterminated_ok: bool,
    pub flags_mask: Option<String>,
}

impl ChecksSpec {
    /// Names of the checks that are actually present, in a fixed order.
    pub fn present(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.min.is_some() {
            out.push("min");
        }
        if self.max.is_some() {
            out.push("max");
        }
        if self.exact_len.is_some() {
            out.push("exact-len");
        }
        if self.min_len.is_some() {
            out.push("min-len");
        }
        if self.max_len.is_some() {
            out.push("max-len");
        }
        if self.unterminated_ok {
            out.push("unterminated-ok");
        }
        if self.flags_mask.is_some() {
            out.push("flags-mask");
        }
        out
    }
}

/// Deserializes a field so that an explicit `key: null` is distinguishable
/// from the key being absent entirely.
fn explicit_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

/// One entry of an enum or flags definition; a bare string is shorthand
/// for an entry with no explicit value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnumEntrySpec {
    Name(String),
    Full {
        name: String,
        value: Option<i64>,
        doc: Option<String>,
    },
}

impl EnumEntrySpec {
    pub fn name(&self) -> &str {
        match self {
            EnumEntrySpec::Name(n) => n,
            EnumEntrySpec::Full { name, .. } => name,
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            EnumEntrySpec::Name(_) => None,
            EnumEntrySpec::Full { value, .. } => *value,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            EnumEntrySpec::Name(_) => None,
            EnumEntrySpec::Full { doc, .. } => doc.as_deref(),
        }
    }
}

/// Value of a `const` definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Int(i64),
    Str(String),
}

/// One member of a `struct` definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StructMemberSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub member_type: String,
    pub len: Option<Limit>,
    pub byte_order: Option<String>,
    pub doc: Option<String>,
    pub display_hint: Option<String>,
    pub r#enum: Option<String>,
}

/// An entry of the `definitions` list: a constant, an enum, a flags set,
/// or a C struct description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Definition {
    pub name: String,
    #[serde(rename = "type")]
    pub def_type: String,
    pub value: Option<ConstValue>,
    #[serde(default)]
    pub entries: Vec<EnumEntrySpec>,
    #[serde(default)]
    pub value_start: i64,
    pub name_prefix: Option<String>,
    #[serde(default, deserialize_with = "explicit_option")]
    pub enum_name: Option<Option<String>>,
    pub enum_cnt_name: Option<String>,
    pub header: Option<String>,
    #[serde(default)]
    pub render_max: bool,
    pub doc: Option<String>,
    #[serde(default)]
    pub members: Vec<StructMemberSpec>,
}

/// One attribute of an attribute set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AttrSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: Option<u64>,
    pub doc: Option<String>,
    pub byte_order: Option<String>,
    #[serde(default)]
    pub multi_attr: bool,
    pub r#enum: Option<String>,
    #[serde(default)]
    pub enum_as_flags: bool,
    #[serde(default)]
    pub checks: ChecksSpec,
    pub sub_type: Option<String>,
    pub len: Option<Limit>,
    pub r#struct: Option<String>,
    pub nested_attributes: Option<String>,
    pub sub_message: Option<String>,
    pub selector: Option<String>,
    #[serde(default)]
    pub type_value: Vec<String>,
    pub fixed_header: Option<String>,
    pub name_prefix: Option<String>,
    pub display_hint: Option<String>,
}

impl AttrSpec {
    /// Name of the attribute set or sub-message this attribute nests into.
    pub fn nested_ref(&self) -> Option<&str> {
        self.nested_attributes
            .as_deref()
            .or(self.sub_message.as_deref())
    }
}

/// A named attribute set, possibly a subset of another set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AttrSetSpec {
    pub name: String,
    pub name_prefix: Option<String>,
    #[serde(default, deserialize_with = "explicit_option")]
    pub enum_name: Option<Option<String>>,
    pub attr_max_name: Option<String>,
    pub attr_cnt_name: Option<String>,
    pub subset_of: Option<String>,
    pub doc: Option<String>,
    pub header: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttrSpec>,
}

/// `request` / `reply` block of an operation mode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpDirectionSpec {
    #[serde(default)]
    pub attributes: Vec<String>,
    pub value: Option<u64>,
}

/// `do` / `dump` block of an operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpModeSpec {
    pub request: Option<OpDirectionSpec>,
    pub reply: Option<OpDirectionSpec>,
    pub pre: Option<String>,
    pub post: Option<String>,
}

/// `event` block of an operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpEventSpec {
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// One operation of the family.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationSpec {
    pub name: String,
    pub doc: Option<String>,
    pub value: Option<u64>,
    pub attribute_set: Option<String>,
    pub fixed_header: Option<String>,
    #[serde(default)]
    pub dont_validate: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub config_cond: Option<String>,
    #[serde(rename = "do")]
    pub do_: Option<OpModeSpec>,
    pub dump: Option<OpModeSpec>,
    pub event: Option<OpEventSpec>,
    pub notify: Option<String>,
    pub mcgrp: Option<String>,
}

impl OperationSpec {
    pub fn is_call(&self) -> bool {
        self.do_.is_some() || self.dump.is_some()
    }

    pub fn is_async(&self) -> bool {
        self.notify.is_some() || self.event.is_some()
    }
}

/// The `operations` mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationsSpec {
    pub name_prefix: Option<String>,
    pub async_prefix: Option<String>,
    pub enum_model: Option<String>,
    #[serde(default, deserialize_with = "explicit_option")]
    pub enum_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_option")]
    pub async_enum: Option<Option<String>>,
    pub fixed_header: Option<String>,
    #[serde(default)]
    pub list: Vec<OperationSpec>,
}

/// One format variant of a sub-message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubMessageFormatSpec {
    pub value: String,
    pub attribute_set: Option<String>,
    pub fixed_header: Option<String>,
}

/// A variant-typed nested message selected by a sibling attribute.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubMessageSpec {
    pub name: String,
    #[serde(default)]
    pub formats: Vec<SubMessageFormatSpec>,
}

/// One multicast group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct McastGroupSpec {
    pub name: String,
    pub c_define_name: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct McastGroupsSpec {
    #[serde(default)]
    pub list: Vec<McastGroupSpec>,
}

/// `kernel-family` extras.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KernelFamilySpec {
    #[serde(default)]
    pub headers: Vec<String>,
    pub sock_priv: Option<String>,
}

fn default_protocol() -> String {
    "genetlink".to_string()
}

/// Top-level family mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FamilySpec {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub version: Option<u64>,
    pub doc: Option<String>,
    pub protonum: Option<u64>,
    pub uapi_header: Option<String>,
    pub c_family_name: Option<String>,
    pub c_version_name: Option<String>,
    pub c_define_name: Option<String>,
    pub cmd_max_name: Option<String>,
    pub cmd_cnt_name: Option<String>,
    #[serde(default)]
    pub max_by_define: bool,
    pub fixed_header: Option<String>,
    #[serde(default)]
    pub definitions: Vec<Definition>,
    #[serde(default)]
    pub attribute_sets: Vec<AttrSetSpec>,
    pub operations: OperationsSpec,
    #[serde(default)]
    pub sub_messages: Vec<SubMessageSpec>,
    #[serde(default)]
    pub mcast_groups: McastGroupsSpec,
    #[serde(default)]
    pub kernel_family: KernelFamilySpec,
    pub kernel_policy: Option<String>,
}

impl FamilySpec {
    /// Family name with dashes mapped to underscores; the stem used for
    /// every generated identifier.
    pub fn ident_name(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Fixed header shared by all operations, unless overridden per op.
    pub fn fixed_header(&self) -> Option<&str> {
        self.operations
            .fixed_header
            .as_deref()
            .or(self.fixed_header.as_deref())
    }

    pub fn is_classic(&self) -> bool {
        self.protocol == "netlink-raw"
    }

    pub fn msg_id_model(&self) -> &str {
        self.operations.enum_model.as_deref().unwrap_or("unified")
    }
}
