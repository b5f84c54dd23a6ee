use super::{ObjectId, ObjectKind, ObjectManager};
use crate::error::RegistryError;
use crate::model::{
	ElementDescription, ExtensionDescription, ExtensionPointDescription, NamespaceDescription,
};

fn host_namespace(bundle_id: u64) -> NamespaceDescription {
	NamespaceDescription::new("com.example.host", bundle_id)
		.with_extension_point(ExtensionPointDescription::new("commands", "Commands"))
		.with_extension(
			ExtensionDescription::new("com.example.host.commands", "Open command")
				.with_id("open")
				.with_element(
					ElementDescription::new("command")
						.with_attribute("name", "open")
						.with_child(ElementDescription::new("keybinding").with_value("ctrl-o")),
				),
		)
}

#[test]
fn ids_stay_monotonic_across_namespaces() {
	let mut objects = ObjectManager::new();
	let first = objects.add_namespace(host_namespace(1)).expect("must add");
	let second = objects
		.add_namespace(
			NamespaceDescription::new("com.example.tools", 2)
				.with_extension(ExtensionDescription::new("com.example.host.commands", "Save")),
		)
		.expect("must add");

	let mut seen: Vec<ObjectId> = Vec::new();
	seen.extend(&first.points);
	seen.extend(&first.extensions);
	seen.extend(&second.extensions);
	let mut sorted = seen.clone();
	sorted.sort_unstable();
	sorted.dedup();
	assert_eq!(sorted.len(), seen.len(), "ids must never repeat");
	assert!(second.extensions[0] > first.extensions[0]);
}

#[test]
fn kind_checks_distinguish_mismatch_from_stale() {
	let mut objects = ObjectManager::new();
	let added = objects.add_namespace(host_namespace(1)).expect("must add");
	let point = added.points[0];

	match objects.get_object(point, ObjectKind::Extension) {
		Err(RegistryError::KindMismatch { expected, found, .. }) => {
			assert_eq!(expected, ObjectKind::Extension);
			assert_eq!(found, ObjectKind::ExtensionPoint);
		}
		other => panic!("expected kind mismatch, got {other:?}"),
	}
	match objects.get_object(9999, ObjectKind::Extension) {
		Err(RegistryError::StaleHandle { id }) => assert_eq!(id, 9999),
		other => panic!("expected stale handle, got {other:?}"),
	}
}

#[test]
fn duplicate_extension_point_rejects_the_whole_namespace() {
	let mut objects = ObjectManager::new();
	objects.add_namespace(host_namespace(1)).expect("must add");

	let clash = NamespaceDescription::new("com.example.host", 2)
		.with_extension_point(ExtensionPointDescription::new("commands", "Clashing commands"));
	match objects.add_namespace(clash) {
		Err(RegistryError::DuplicateExtensionPoint { unique_id }) => {
			assert_eq!(unique_id, "com.example.host.commands");
		}
		other => panic!("expected duplicate rejection, got {other:?}"),
	}
	assert!(!objects.has_namespace(2), "failed add must leave no state");
}

#[test]
fn extension_without_target_rejects_the_whole_namespace() {
	let mut objects = ObjectManager::new();
	let bad = NamespaceDescription::new("com.example.bad", 1)
		.with_extension_point(ExtensionPointDescription::new("views", "Views"))
		.with_extension(ExtensionDescription::new("", "No target"));

	assert!(matches!(
		objects.add_namespace(bad),
		Err(RegistryError::MissingTarget { .. })
	));
	assert!(!objects.has_namespace(1));
	assert!(objects.extension_point_id("com.example.bad.views").is_none());
}

#[test]
fn resident_bundle_cannot_contribute_twice() {
	let mut objects = ObjectManager::new();
	objects.add_namespace(host_namespace(1)).expect("must add");
	assert!(matches!(
		objects.add_namespace(NamespaceDescription::new("com.example.other", 1)),
		Err(RegistryError::NamespaceResident { bundle_id: 1 })
	));
}

#[test]
fn element_trees_carry_parent_links_and_attributes() {
	let mut objects = ObjectManager::new();
	let added = objects.add_namespace(host_namespace(1)).expect("must add");
	let extension = objects
		.extension_record(added.extensions[0])
		.expect("must resolve extension");
	assert_eq!(extension.raw_children.len(), 1);

	let root = objects
		.element_record(extension.raw_children[0], ObjectKind::ConfigurationElement)
		.expect("must resolve element");
	assert_eq!(root.name, "command");
	assert_eq!(root.attribute("name"), Some("open"));
	assert_eq!(root.attribute("missing"), None);
	assert_eq!(root.parent_id, extension.id);
	assert_eq!(root.parent_kind, ObjectKind::Extension);

	let leaf = objects
		.element_record(root.raw_children[0], ObjectKind::ConfigurationElement)
		.expect("must resolve child");
	assert_eq!(leaf.value.as_deref(), Some("ctrl-o"));
	assert_eq!(leaf.parent_id, root.id);
	assert_eq!(leaf.parent_kind, ObjectKind::ConfigurationElement);
}

#[test]
fn shallow_remove_cascades_into_element_subtrees() {
	let mut objects = ObjectManager::new();
	let added = objects.add_namespace(host_namespace(1)).expect("must add");
	let extension = objects
		.extension_record(added.extensions[0])
		.expect("must resolve extension");
	let root = extension.raw_children[0];
	let leaf = objects
		.element_record(root, ObjectKind::ConfigurationElement)
		.expect("must resolve element")
		.raw_children[0];

	objects.remove(extension.id, false);
	assert!(objects.kind_of(extension.id).is_none());
	assert!(objects.kind_of(root).is_none());
	assert!(objects.kind_of(leaf).is_none());
}

#[test]
fn deep_remove_takes_one_row_at_a_time() {
	let mut objects = ObjectManager::new();
	let added = objects.add_namespace(host_namespace(1)).expect("must add");
	let extension = objects
		.extension_record(added.extensions[0])
		.expect("must resolve extension");
	let root = extension.raw_children[0];

	objects.remove(extension.id, true);
	assert!(objects.kind_of(extension.id).is_none());
	assert!(
		objects.kind_of(root).is_some(),
		"dispose_deep leaves dependents to the caller"
	);
}

#[test]
fn orphan_lists_drop_when_emptied() {
	let mut objects = ObjectManager::new();
	objects.add_orphan("x.p".into(), 11);
	objects.add_orphan("x.p".into(), 12);
	objects.remove_orphan("x.p", 11);
	assert_eq!(objects.orphan_table().get("x.p"), Some(&vec![12]));
	objects.remove_orphan("x.p", 12);
	assert!(objects.orphan_table().get("x.p").is_none());
}

#[test]
fn dirty_tracks_mutations() {
	let mut objects = ObjectManager::new();
	assert!(!objects.is_dirty());
	objects.add_namespace(host_namespace(1)).expect("must add");
	assert!(objects.is_dirty());
}

#[test]
fn anonymous_points_stay_out_of_the_index() {
	let mut objects = ObjectManager::new();
	let added = objects
		.add_namespace(
			NamespaceDescription::anonymous(9)
				.with_extension_point(ExtensionPointDescription::new("hidden", "Hidden")),
		)
		.expect("must add");
	assert!(!added.named);
	assert!(objects.extension_point_id("hidden").is_none());
	assert!(objects.extension_point_ids().is_empty());
	// The record itself is resident and resolvable by id.
	assert!(objects.extension_point_record(added.points[0]).is_ok());
}
