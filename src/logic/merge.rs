use crate::model::{Association, MutationBody, MutationTree};

/// Identity of an element inside an association array. Elements with an id
/// merge with the same id; id-less bulk elements merge per bulk kind.
#[derive(Debug, PartialEq, Eq)]
enum SiblingKey<'a> {
    Id(&'a str),
    Bulk { destroy: bool },
    Anonymous,
}

fn sibling_key(body: &MutationBody) -> SiblingKey<'_> {
    match (&body.id, body.bulk) {
        (Some(id), _) => SiblingKey::Id(id),
        (None, true) => SiblingKey::Bulk {
            destroy: body.destroy,
        },
        (None, false) => SiblingKey::Anonymous,
    }
}

/// Fold `fragment` into the accumulated tree, merging roots with the same
/// `(type, key, method)`
pub fn merge_trees(acc: &mut MutationTree, fragment: MutationTree) {
    for root in fragment.roots {
        let existing = acc.roots.iter_mut().find(|r| {
            r.resource_type == root.resource_type && r.key == root.key && r.method == root.method
        });
        match existing {
            Some(existing) => merge_bodies(&mut existing.body, root.body),
            None => acc.roots.push(root),
        }
    }
}

/// Deep merge: later attributes win, association arrays merge element-wise by id
pub fn merge_bodies(target: &mut MutationBody, source: MutationBody) {
    target.attributes.extend(source.attributes);
    target.destroy |= source.destroy;
    if target.client_path.is_none() {
        target.client_path = source.client_path;
    }
    if target.error_path.is_none() {
        target.error_path = source.error_path;
    }
    if target.temp_id.is_none() {
        target.temp_id = source.temp_id;
    }
    if target.bulk_filter.is_none() {
        target.bulk_filter = source.bulk_filter;
    }

    for (name, association) in source.associations {
        match target.associations.get_mut(&name) {
            Some(existing) => merge_associations(existing, association),
            None => {
                target.associations.insert(name, association);
            }
        }
    }
}

fn merge_associations(target: &mut Association, source: Association) {
    match source {
        Association::One(incoming) => match target {
            Association::One(existing) => merge_bodies(existing, *incoming),
            Association::Many(items) => merge_into_siblings(items, *incoming),
        },
        Association::Many(incoming) => {
            if let Association::One(existing) = &mut *target {
                let single = std::mem::take(existing.as_mut());
                *target = Association::Many(vec![single]);
            }
            if let Association::Many(items) = target {
                for item in incoming {
                    merge_into_siblings(items, item);
                }
            }
        }
    }
}

fn merge_into_siblings(items: &mut Vec<MutationBody>, item: MutationBody) {
    let position = match sibling_key(&item) {
        SiblingKey::Anonymous => None,
        key => items.iter().position(|existing| sibling_key(existing) == key),
    };
    match position {
        Some(idx) => merge_bodies(&mut items[idx], item),
        None => items.push(item),
    }
}

/// Regroup every association array of the tree so each id appears once,
/// keeping first-appearance order
pub fn merge_siblings(tree: &mut MutationTree) {
    tree.for_each_body_mut(&mut |body: &mut MutationBody| {
        for association in body.associations.values_mut() {
            if let Association::Many(items) = association {
                let drained: Vec<MutationBody> = std::mem::take(items);
                for item in drained {
                    merge_into_siblings(items, item);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Method;
    use serde_json::json;

    fn child(id: &str, attrs: serde_json::Value) -> MutationBody {
        let mut body = MutationBody::new("question", Some(id.to_string()));
        body.attributes = attrs.as_object().cloned().unwrap_or_default();
        body
    }

    fn fragment(children: Vec<MutationBody>) -> MutationTree {
        let mut tree = MutationTree::new();
        tree.root_mut("survey", "1", Method::Update)
            .body
            .associations
            .insert("questions".to_string(), Association::Many(children));
        tree
    }

    fn questions(tree: &MutationTree) -> &Vec<MutationBody> {
        match &tree.roots[0].body.associations["questions"] {
            Association::Many(items) => items,
            Association::One(_) => panic!("expected many"),
        }
    }

    #[test]
    fn test_same_id_merges_instead_of_duplicating() {
        let mut acc = MutationTree::new();
        merge_trees(&mut acc, fragment(vec![child("2", json!({"x": 1}))]));
        merge_trees(&mut acc, fragment(vec![child("2", json!({"y": 2}))]));

        assert_eq!(acc.roots.len(), 1);
        let items = questions(&acc);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attributes["x"], 1);
        assert_eq!(items[0].attributes["y"], 2);
    }

    #[test]
    fn test_distinct_ids_keep_first_appearance_order() {
        let mut acc = MutationTree::new();
        merge_trees(&mut acc, fragment(vec![child("3", json!({}))]));
        merge_trees(&mut acc, fragment(vec![child("[q1]", json!({}))]));
        merge_trees(&mut acc, fragment(vec![child("3", json!({"x": 1}))]));
        merge_trees(&mut acc, fragment(vec![child("2", json!({}))]));

        let ids: Vec<&str> = questions(&acc)
            .iter()
            .filter_map(|b| b.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["3", "[q1]", "2"]);
    }

    #[test]
    fn test_later_attributes_win_and_nested_arrays_stay_opaque() {
        let mut acc = MutationTree::new();
        merge_trees(
            &mut acc,
            fragment(vec![child("2", json!({"grid": [[1, 2], [3, 4]], "x": 1}))]),
        );
        merge_trees(&mut acc, fragment(vec![child("2", json!({"grid": [[5]], "x": 2}))]));

        let item = &questions(&acc)[0];
        assert_eq!(item.attributes["grid"], json!([[5]]));
        assert_eq!(item.attributes["x"], 2);
    }

    #[test]
    fn test_destroy_marker_survives_merge() {
        let mut acc = MutationTree::new();
        merge_trees(&mut acc, fragment(vec![child("2", json!({"x": 1}))]));
        let mut destroyed = child("2", json!({}));
        destroyed.destroy = true;
        merge_trees(&mut acc, fragment(vec![destroyed]));

        assert!(questions(&acc)[0].destroy);
    }

    #[test]
    fn test_merge_siblings_regroups_arrays() {
        let mut tree = fragment(vec![
            child("2", json!({"x": 1})),
            child("4", json!({})),
            child("2", json!({"y": 2})),
        ]);
        merge_siblings(&mut tree);
        let items = questions(&tree);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].attributes.len(), 2);
    }

    #[test]
    fn test_bulk_elements_group_by_kind() {
        let mut update_all = MutationBody::bulk("question");
        update_all.attributes.insert("x".to_string(), json!(1));
        let mut destroy_all = MutationBody::bulk("question");
        destroy_all.destroy = true;

        let mut tree = fragment(vec![update_all.clone(), destroy_all, update_all]);
        merge_siblings(&mut tree);
        assert_eq!(questions(&tree).len(), 2);
    }
}
