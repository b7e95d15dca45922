//! Multi-pass resolution over the built IR.
//!
//! Pass order matters: notifications are marked first, events get their
//! mock 'do' replies, then root sets are collected, nested struct shapes
//! discovered and topologically ordered, reachability propagated, and
//! finally selectors, hooks and the global policy are wired up.

use indexmap::{IndexMap, IndexSet};
use nlspec::{AttrSpec, OpDirectionSpec, OpModeSpec};

use crate::ir::{build_attr, AttrKind, AttrSet, Family, OpMode, RootSet};
use crate::names::{c_safe_name, c_upper};
use crate::shape::StructShape;

pub fn resolve(family: &mut Family) -> Result<(), String> {
    mark_notify(family)?;
    mock_up_events(family);
    load_root_sets(family);
    load_nested_sets(family)?;
    load_attr_use(family);
    load_selector_passing(family)?;
    load_hooks(family);
    if family.kernel_policy == "global" {
        load_global_policy(family)?;
    }
    Ok(())
}

fn mark_notify(family: &mut Family) -> Result<(), String> {
    let mut targets = Vec::new();
    for op in family.msgs.values() {
        if let Some(target) = &op.spec.notify {
            targets.push((op.name.clone(), target.clone()));
        }
    }
    for (op_name, target) in targets {
        match family.msgs.get_mut(&target) {
            Some(op) => op.has_ntf = true,
            None => {
                return Err(format!(
                    "notification '{}' refers to unknown operation '{}'",
                    op_name, target
                ));
            }
        }
    }
    Ok(())
}

/// Fake a 'do' equivalent of all events, so that their response parsing
/// renders through the normal path.
fn mock_up_events(family: &mut Family) {
    for op in family.msgs.values_mut() {
        if let Some(event) = &op.spec.event {
            op.spec.do_ = Some(OpModeSpec {
                request: None,
                reply: Some(OpDirectionSpec {
                    attributes: event.attributes.clone(),
                    value: None,
                }),
                pre: None,
                post: None,
            });
        }
    }
}

fn load_root_sets(family: &mut Family) {
    let mut root_sets: IndexMap<String, RootSet> = IndexMap::new();
    for op in family.msgs.values() {
        let Some(set_name) = &op.attribute_set else {
            continue;
        };

        let mut req_attrs = IndexSet::new();
        let mut rsp_attrs = IndexSet::new();
        for mode in [OpMode::Do, OpMode::Dump] {
            if let Some(req) = op.request_of(mode) {
                req_attrs.extend(req.attributes.iter().cloned());
            }
            if let Some(rsp) = op.reply_of(mode) {
                rsp_attrs.extend(rsp.attributes.iter().cloned());
            }
        }
        if let Some(event) = &op.spec.event {
            rsp_attrs.extend(event.attributes.iter().cloned());
        }

        let entry = root_sets.entry(set_name.clone()).or_default();
        entry.request.extend(req_attrs);
        entry.reply.extend(rsp_attrs);
    }
    family.root_sets = root_sets;
}

/// Member facts needed while walking a set's attributes with the family
/// borrowed mutably.
#[derive(Clone)]
struct MemberRef {
    attr_name: String,
    nested: Option<String>,
    is_submsg: bool,
    multi_val: bool,
    kind: AttrKind,
    type_value: Vec<String>,
    fixed_header: Option<String>,
    enum_name: String,
}

fn member_refs(family: &Family, set_name: &str) -> Result<Vec<MemberRef>, String> {
    let set = family.attr_set(set_name)?;
    Ok(set
        .attrs
        .values()
        .map(|a| MemberRef {
            attr_name: a.name.clone(),
            nested: a.nested.as_ref().map(|n| n.name.clone()),
            is_submsg: a.kind == AttrKind::SubMessage,
            multi_val: a.is_multi_val(),
            kind: a.kind,
            type_value: a.type_value.clone(),
            fixed_header: a.fixed_header.clone(),
            enum_name: a.enum_name.clone(),
        })
        .collect())
}

fn load_nested_sets(family: &mut Family) -> Result<(), String> {
    let mut queue: Vec<String> = family.root_sets.keys().cloned().collect();
    let mut seen: IndexSet<String> = queue.iter().cloned().collect();

    while let Some(set_name) = if queue.is_empty() {
        None
    } else {
        Some(queue.remove(0))
    } {
        for member in member_refs(family, &set_name)? {
            let Some(nested) = member.nested.clone() else {
                continue;
            };
            if member.is_submsg {
                load_nested_set_submsg(family, &nested, &member.enum_name)?;
            } else {
                load_nested_set_nest(family, &nested, &member)?;
            }
            if !seen.contains(&nested) {
                queue.push(nested.clone());
                seen.insert(nested);
            }
        }
    }

    // Initial reachability from the root sets.
    let root_sets = family.root_sets.clone();
    for (root_set, rs_members) in &root_sets {
        for member in member_refs(family, root_set)? {
            let Some(nested) = member.nested else {
                continue;
            };
            let shape = family
                .pure_nested_structs
                .get_mut(&nested)
                .ok_or_else(|| format!("unresolved nested set '{}'", nested))?;
            if rs_members.request.contains(&member.attr_name) {
                shape.request = true;
            }
            if rs_members.reply.contains(&member.attr_name) {
                shape.reply = true;
            }
            if member.multi_val {
                shape.in_multi_val = true;
            }
        }
    }

    sort_pure_types(family)?;
    propagate_nested(family)?;
    sort_pure_types(family)?;
    Ok(())
}

fn load_nested_set_nest(
    family: &mut Family,
    nested: &str,
    member: &MemberRef,
) -> Result<(), String> {
    if family.root_sets.contains_key(nested) {
        return Err(format!(
            "Using attr set as root and nested not supported - {}",
            nested
        ));
    }

    let mut inherit: IndexSet<String> = IndexSet::new();
    if !member.type_value.is_empty() {
        inherit.extend(member.type_value.iter().cloned());
    } else if member.kind == AttrKind::ArrayNest {
        inherit.insert("idx".to_string());
    }

    if !family.pure_nested_structs.contains_key(nested) {
        let shape = StructShape::new(
            family,
            nested,
            None,
            member.fixed_header.as_deref(),
            Some(inherit.iter().cloned().collect()),
            None,
        )?;
        family.pure_nested_structs.insert(nested.to_string(), shape);
    }
    family
        .pure_nested_structs
        .get_mut(nested)
        .unwrap()
        .set_inherited(&inherit)
}

/// Synthesize the attribute set standing in for a sub-message: one member
/// per format variant, named and numbered like a real set.
fn load_nested_set_submsg(
    family: &mut Family,
    submsg_name: &str,
    parent_enum: &str,
) -> Result<(), String> {
    let submsg = family
        .sub_msgs
        .get(submsg_name)
        .cloned()
        .ok_or_else(|| format!("unknown sub-message '{}'", submsg_name))?;

    let name_prefix = c_upper(&format!("{}-a-{}-", family.ident_name, submsg_name));
    let mut attrs = IndexMap::new();
    let mut value = 1u64;
    for fmt in &submsg.formats {
        let mut spec = AttrSpec {
            name: fmt.value.clone(),
            ..AttrSpec::default()
        };
        if let Some(attr_set) = &fmt.attribute_set {
            spec.attr_type = "nest".to_string();
            spec.nested_attributes = Some(attr_set.clone());
            if let Some(hdr) = &fmt.fixed_header {
                spec.fixed_header = Some(hdr.clone());
            }
        } else if let Some(hdr) = &fmt.fixed_header {
            spec.attr_type = "binary".to_string();
            spec.r#struct = Some(hdr.clone());
        } else {
            spec.attr_type = "flag".to_string();
        }

        let attr = build_attr(
            &family.raw,
            &family.consts,
            &family.ident_name,
            family.is_classic(),
            submsg_name,
            &name_prefix,
            &spec,
            value,
            Some(parent_enum),
        )?;
        value += 1;
        attrs.insert(attr.name.clone(), attr);
    }

    let set = AttrSet {
        name: submsg_name.to_string(),
        subset_of: None,
        name_prefix: name_prefix.clone(),
        max_name: format!("{}MAX", name_prefix),
        cnt_name: format!("__{}MAX", name_prefix),
        c_name: c_safe_name(submsg_name),
        header: None,
        enum_name_key: None,
        doc: None,
        attrs,
    };
    family.attr_sets.insert(submsg_name.to_string(), set);

    if !family.pure_nested_structs.contains_key(submsg_name) {
        let shape = StructShape::new(family, submsg_name, None, None, None, Some(submsg_name))?;
        family
            .pure_nested_structs
            .insert(submsg_name.to_string(), shape);
    }
    Ok(())
}

/// Bubble the pure-nested structs into dependency order: a struct moves
/// behind any not-yet-placed nest it contains, unless that nest is
/// recursive (those become pointers and may stay unordered).
fn sort_pure_types(family: &mut Family) -> Result<(), String> {
    let mut key_list: Vec<String> = family.pure_nested_structs.keys().cloned().collect();
    let mut key_seen: IndexSet<String> = IndexSet::new();
    let rounds = key_list.len() * key_list.len();
    for _ in 0..rounds {
        if key_list.is_empty() {
            break;
        }
        let name = key_list.remove(0);
        let mut finished = true;
        for member in member_refs(family, &name)? {
            let Some(nested) = member.nested else {
                continue;
            };
            let recursive = family
                .pure_nested_structs
                .get(&nested)
                .ok_or_else(|| format!("unresolved dependency on '{}' in '{}'", nested, name))?
                .recursive;
            if recursive {
                continue;
            }
            if !key_seen.contains(&nested) {
                // Map insertion order is render order; push this one back.
                let shape = family.pure_nested_structs.shift_remove(&name).unwrap();
                family.pure_nested_structs.insert(name.clone(), shape);
                finished = false;
                break;
            }
        }
        if finished {
            key_seen.insert(name);
        } else {
            key_list.push(name);
        }
    }
    Ok(())
}

/// Propagate request/reply/recursive/multi facts through the nesting
/// graph, walking depth-last so children see their parents' state.
fn propagate_nested(family: &mut Family) -> Result<(), String> {
    let keys: Vec<String> = family.pure_nested_structs.keys().cloned().collect();
    for name in keys.iter().rev() {
        for member in member_refs(family, name)? {
            {
                let shape = &family.pure_nested_structs[name];
                if shape.child_nests.contains(name) {
                    family
                        .pure_nested_structs
                        .get_mut(name)
                        .unwrap()
                        .recursive = true;
                }
            }

            let Some(child_name) = member.nested else {
                continue;
            };
            family
                .pure_nested_structs
                .get_mut(name)
                .unwrap()
                .child_nests
                .insert(child_name.clone());

            let (parent_request, parent_reply) = {
                let shape = &family.pure_nested_structs[name];
                (shape.request, shape.reply)
            };
            let child_info = family
                .pure_nested_structs
                .get(&child_name)
                .map(|c| (c.recursive, c.child_nests.clone()));
            if let Some((child_recursive, child_nests)) = child_info {
                if !child_recursive {
                    family
                        .pure_nested_structs
                        .get_mut(name)
                        .unwrap()
                        .child_nests
                        .extend(child_nests);
                }
                let child = family.pure_nested_structs.get_mut(&child_name).unwrap();
                child.request |= parent_request;
                child.reply |= parent_reply;
                if member.multi_val {
                    child.in_multi_val = true;
                }
            }
        }

        let shape = family.pure_nested_structs.get_mut(name).unwrap();
        if shape.child_nests.contains(name) {
            shape.recursive = true;
        }
    }
    Ok(())
}

/// Mirror struct-level reachability onto the member attributes; subset
/// members also mark the parent set's real attribute.
fn set_attr_use(family: &mut Family, set_name: &str, attr_name: &str, request: bool, reply: bool) {
    let mut set_name = set_name.to_string();
    loop {
        let Some(set) = family.attr_sets.get_mut(&set_name) else {
            return;
        };
        let subset_of = set.subset_of.clone();
        if let Some(attr) = set.attrs.get_mut(attr_name) {
            attr.request |= request;
            attr.reply |= reply;
        }
        match subset_of {
            Some(parent) => set_name = parent,
            None => return,
        }
    }
}

fn load_attr_use(family: &mut Family) {
    let pure: Vec<(String, bool, bool)> = family
        .pure_nested_structs
        .iter()
        .map(|(k, v)| (k.clone(), v.request, v.reply))
        .collect();
    for (set_name, request, reply) in pure {
        let members: Vec<String> = family.attr_sets[&set_name].attrs.keys().cloned().collect();
        for attr_name in members {
            set_attr_use(family, &set_name, &attr_name, request, reply);
        }
    }

    let root_sets = family.root_sets.clone();
    for (set_name, rs_members) in &root_sets {
        let members: Vec<String> = family.attr_sets[set_name].attrs.keys().cloned().collect();
        for attr_name in members {
            let request = rs_members.request.contains(&attr_name);
            let reply = rs_members.reply.contains(&attr_name);
            if request || reply {
                set_attr_use(family, set_name, &attr_name, request, reply);
            }
        }
    }
}

/// External sub-message selectors must be satisfied one layer up; deeper
/// threading is not supported.
fn load_selector_passing(family: &mut Family) -> Result<(), String> {
    let mut order: Vec<String> = family.pure_nested_structs.keys().cloned().collect();
    order.reverse();
    order.extend(family.root_sets.keys().cloned());

    for set_name in order {
        for member in member_refs(family, &set_name)? {
            let Some(child_name) = member.nested else {
                continue;
            };
            let Some(child) = family.pure_nested_structs.get(&child_name) else {
                continue;
            };
            for selector in child.external_selectors(family) {
                if !family.attr_sets[&set_name].attrs.contains_key(&selector) {
                    return Err(format!(
                        "Passing selector '{}' thru more than one layer not supported",
                        selector
                    ));
                }
            }
        }
    }
    Ok(())
}

fn load_hooks(family: &mut Family) {
    let mut hooks = crate::ir::Hooks::default();
    for op in family.ops_iter() {
        for (mode, pre_list, post_list) in [
            (OpMode::Do, &mut hooks.pre_do, &mut hooks.post_do),
            (OpMode::Dump, &mut hooks.pre_dump, &mut hooks.post_dump),
        ] {
            let Some(mode_spec) = op.mode(mode) else {
                continue;
            };
            if let Some(pre) = &mode_spec.pre {
                if !pre_list.contains(pre) {
                    pre_list.push(pre.clone());
                }
            }
            if let Some(post) = &mode_spec.post {
                if !post_list.contains(post) {
                    post_list.push(post.clone());
                }
            }
        }
    }
    family.hooks = hooks;
}

/// A single policy covering every op: all ops must share one attribute
/// set; the policy is the ordered union of their request attributes.
fn load_global_policy(family: &mut Family) -> Result<(), String> {
    let mut global_set: IndexSet<String> = IndexSet::new();
    let mut attr_set_name: Option<String> = None;
    for op in family.ops_iter() {
        let Some(set_name) = &op.attribute_set else {
            continue;
        };
        match &attr_set_name {
            None => attr_set_name = Some(set_name.clone()),
            Some(existing) if existing != set_name => {
                return Err("For a global policy all ops must use the same set".to_string());
            }
            _ => {}
        }
        for mode in [OpMode::Do, OpMode::Dump] {
            if let Some(req) = op.request_of(mode) {
                global_set.extend(req.attributes.iter().cloned());
            }
        }
    }

    family.global_policy = match &attr_set_name {
        Some(set_name) => family.attr_sets[set_name]
            .attrs
            .keys()
            .filter(|a| global_set.contains(*a))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    family.global_policy_set = attr_set_name;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn resolved_family(yaml: &str) -> Family {
        try_resolved_family(yaml).unwrap()
    }

    fn try_resolved_family(yaml: &str) -> Result<Family, String> {
        let text = format!("# SPDX-License-Identifier: test\n{}", yaml);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join("nlgen-resolver-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("fam-{}-{}.yaml", std::process::id(), n));
        std::fs::write(&path, text).unwrap();
        let loaded = nlspec::LoadedFamily::load(&path, &[]).map_err(|e| e.to_string())?;
        let mut family = Family::new(loaded)?;
        resolve(&mut family)?;
        Ok(family)
    }

    const NESTED_FAMILY: &str = "\
name: demo
attribute-sets:
  - name: leaf
    attributes:
      - name: id
        type: u32
  - name: branch
    attributes:
      - name: twig
        type: nest
        nested-attributes: leaf
  - name: main
    attributes:
      - name: top
        type: nest
        nested-attributes: branch
operations:
  list:
    - name: get
      attribute-set: main
      do:
        request:
          attributes: [top]
        reply:
          attributes: [top]
";

    #[test]
    fn nested_sets_are_discovered_and_ordered() {
        let fam = resolved_family(NESTED_FAMILY);
        let order: Vec<&String> = fam.pure_nested_structs.keys().collect();
        assert_eq!(order, vec!["leaf", "branch"]);
        assert!(fam.pure_nested_structs["leaf"].request);
        assert!(fam.pure_nested_structs["leaf"].reply);
        assert!(!fam.pure_nested_structs["leaf"].recursive);
    }

    #[test]
    fn attr_use_reaches_nested_members() {
        let fam = resolved_family(NESTED_FAMILY);
        assert!(fam.attr("leaf", "id").request);
        assert!(fam.attr("leaf", "id").reply);
        assert!(fam.attr("main", "top").request);
    }

    #[test]
    fn recursive_nests_are_detected() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: node\n    attributes:\n      - name: child\n        type: nest\n        nested-attributes: node\n      - name: id\n        type: u32\n  - name: main\n    attributes:\n      - name: root\n        type: nest\n        nested-attributes: node\noperations:\n  list:\n    - name: get\n      attribute-set: main\n      do:\n        reply:\n          attributes: [root]\n",
        );
        assert!(fam.pure_nested_structs["node"].recursive);
        assert!(fam.pure_nested_structs["node"].reply);
        assert!(!fam.pure_nested_structs["node"].request);
    }

    #[test]
    fn root_and_nested_use_is_rejected() {
        let err = try_resolved_family(
            "name: demo\nattribute-sets:\n  - name: main\n    attributes:\n      - name: inner\n        type: nest\n        nested-attributes: main\noperations:\n  list:\n    - name: get\n      attribute-set: main\n      do:\n        request:\n          attributes: [inner]\n",
        )
        .unwrap_err();
        assert!(err.contains("root and nested"), "unexpected error: {}", err);
    }

    #[test]
    fn notify_marks_target_op() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: main\n    attributes:\n      - name: id\n        type: u32\noperations:\n  list:\n    - name: get\n      attribute-set: main\n      do:\n        reply:\n          attributes: [id]\n    - name: get-ntf\n      notify: get\n",
        );
        assert!(fam.op("get").has_ntf);
        assert_eq!(fam.ntfs, vec!["get-ntf"]);
    }

    #[test]
    fn events_gain_a_mock_do_reply() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: main\n    attributes:\n      - name: id\n        type: u32\noperations:\n  list:\n    - name: changed\n      attribute-set: main\n      event:\n        attributes: [id]\n",
        );
        let op = fam.op("changed");
        let reply = op.reply_of(OpMode::Do).unwrap();
        assert_eq!(reply.attributes, vec!["id"]);
        assert!(fam.attr("main", "id").reply);
    }

    #[test]
    fn multi_attr_nest_marks_in_multi_val() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: entry\n    attributes:\n      - name: id\n        type: u32\n  - name: main\n    attributes:\n      - name: entries\n        type: nest\n        multi-attr: true\n        nested-attributes: entry\noperations:\n  list:\n    - name: get\n      attribute-set: main\n      do:\n        reply:\n          attributes: [entries]\n",
        );
        assert!(fam.pure_nested_structs["entry"].in_multi_val);
    }

    #[test]
    fn submsg_synthesizes_attr_set() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: foo-attrs\n    attributes:\n      - name: val\n        type: u32\n  - name: main\n    attributes:\n      - name: kind\n        type: string\n      - name: data\n        type: sub-message\n        sub-message: my-msg\n        selector: kind\nsub-messages:\n  - name: my-msg\n    formats:\n      - value: foo\n        attribute-set: foo-attrs\n      - value: bar\noperations:\n  list:\n    - name: get\n      attribute-set: main\n      do:\n        reply:\n          attributes: [kind, data]\n",
        );
        let synth = &fam.attr_sets["my-msg"];
        assert_eq!(synth.attrs.len(), 2);
        assert_eq!(synth.attrs["foo"].kind, AttrKind::Nest);
        assert_eq!(synth.attrs["bar"].kind, AttrKind::Flag);
        assert!(fam.attr("main", "kind").is_selector);
        assert!(fam.pure_nested_structs.contains_key("my-msg"));
        assert!(fam.pure_nested_structs["foo-attrs"].reply);
    }

    #[test]
    fn global_policy_is_ordered_union() {
        let fam = resolved_family(
            "name: demo\nkernel-policy: global\nattribute-sets:\n  - name: main\n    attributes:\n      - name: a\n        type: u32\n      - name: b\n        type: u32\n      - name: c\n        type: u32\noperations:\n  list:\n    - name: one\n      attribute-set: main\n      do:\n        request:\n          attributes: [c]\n    - name: two\n      attribute-set: main\n      do:\n        request:\n          attributes: [a]\n",
        );
        assert_eq!(fam.global_policy, vec!["a", "c"]);
        assert_eq!(fam.global_policy_set.as_deref(), Some("main"));
    }

    #[test]
    fn hooks_dedup_in_first_seen_order() {
        let fam = resolved_family(
            "name: demo\nattribute-sets:\n  - name: main\n    attributes:\n      - name: id\n        type: u32\noperations:\n  list:\n    - name: one\n      attribute-set: main\n      do:\n        pre: demo-nl-pre-doit\n        post: demo-nl-post-doit\n        request:\n          attributes: [id]\n    - name: two\n      attribute-set: main\n      do:\n        pre: demo-nl-pre-doit\n        request:\n          attributes: [id]\n",
        );
        assert_eq!(fam.hooks.pre_do, vec!["demo-nl-pre-doit"]);
        assert_eq!(fam.hooks.post_do, vec!["demo-nl-post-doit"]);
    }
}
