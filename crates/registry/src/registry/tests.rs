use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::ExtensionRegistry;
use crate::config::RegistryConfig;
use crate::delta::DeltaKind;
use crate::error::RegistryError;
use crate::event::{RegistryChangeEvent, RegistryChangeListener};
use crate::model::{
	ElementDescription, ExtensionDescription, ExtensionPointDescription, NamespaceDescription,
};
use crate::object::{BundleId, ObjectId, ObjectKind};

#[derive(Debug, Clone)]
struct Seen {
	bundles: Vec<BundleId>,
	added: Vec<(ObjectId, ObjectId)>,
	removed: Vec<(ObjectId, ObjectId)>,
	removed_points: Vec<String>,
}

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<Seen>>,
}

impl Recorder {
	fn events(&self) -> Vec<Seen> {
		self.events.lock().clone()
	}
}

impl RegistryChangeListener for Recorder {
	fn registry_changed(&self, event: &RegistryChangeEvent) {
		let mut added = Vec::new();
		let mut removed = Vec::new();
		for delta in event.extension_deltas() {
			match delta.kind {
				DeltaKind::Added => added.push((delta.extension, delta.extension_point)),
				DeltaKind::Removed => removed.push((delta.extension, delta.extension_point)),
			}
		}
		self.events.lock().push(Seen {
			bundles: event.affected_bundles(),
			added,
			removed,
			removed_points: event
				.removed_extension_points()
				.iter()
				.map(|point| point.to_string())
				.collect(),
		});
	}
}

fn registry() -> ExtensionRegistry {
	ExtensionRegistry::new(RegistryConfig::default())
}

/// Namespace `x` declaring the extension point `x.p`.
fn provider(bundle_id: BundleId) -> NamespaceDescription {
	NamespaceDescription::new("x", bundle_id)
		.with_extension_point(ExtensionPointDescription::new("p", "Plug point"))
}

/// Namespace `a` contributing one extension targeting `x.p`.
fn contributor(bundle_id: BundleId) -> NamespaceDescription {
	NamespaceDescription::new("a", bundle_id)
		.with_extension(ExtensionDescription::new("x.p", "Contribution").with_id("e1"))
}

/// A self-contained namespace whose extension links to its own point.
fn self_linked(name: &str, bundle_id: BundleId) -> NamespaceDescription {
	NamespaceDescription::new(name, bundle_id)
		.with_extension_point(ExtensionPointDescription::new("p", "Point"))
		.with_extension(ExtensionDescription::new(format!("{name}.p"), "Self link"))
}

#[test]
fn orphan_waits_until_its_point_arrives() {
	let registry = registry();
	let recorder = Arc::new(Recorder::default());
	registry.add_listener(recorder.clone(), None);

	registry.add(contributor(1)).expect("must add contributor");
	registry.synchronize();
	assert!(recorder.events().is_empty(), "an orphan add has no deltas");
	{
		let data = registry.inner.data.read();
		assert_eq!(data.objects.orphan_table().get("x.p").map(Vec::len), Some(1));
	}

	registry.add(provider(2)).expect("must add provider");
	registry.synchronize();

	let point = registry.extension_point("x.p").expect("point must exist");
	let extensions = point.extensions().expect("must list extensions");
	assert_eq!(extensions.len(), 1);
	assert_eq!(
		extensions[0].unique_identifier().expect("must resolve").as_deref(),
		Some("a.e1")
	);
	{
		let data = registry.inner.data.read();
		assert!(data.objects.orphan_table().get("x.p").is_none());
	}

	let events = recorder.events();
	assert_eq!(events.len(), 1);
	// The adoption is attributed to the point's bundle.
	assert_eq!(events[0].bundles, vec![2]);
	assert_eq!(events[0].added.len(), 1);
	assert_eq!(events[0].added[0].0, extensions[0].id());
}

/// Listener that parks its dispatch job until the test releases it.
struct Gate {
	release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl RegistryChangeListener for Gate {
	fn registry_changed(&self, _event: &RegistryChangeEvent) {
		if let Some(release) = self.release.lock().take() {
			let _ = release.recv_timeout(Duration::from_secs(5));
		}
	}
}

#[test]
fn removing_a_point_orphans_its_surviving_extensions() {
	let registry = registry();
	let recorder = Arc::new(Recorder::default());
	registry.add_listener(recorder.clone(), None);

	registry.add(contributor(1)).expect("must add contributor");
	registry.add(provider(2)).expect("must add provider");
	registry.synchronize();
	let extension_id = registry
		.extension_point("x.p")
		.expect("point must exist")
		.extensions()
		.expect("must list")[0]
		.id();

	// Hold the removal's dispatch job open so the window between the
	// write-lock release and physical cleanup stays observable.
	let (release, parked) = std::sync::mpsc::channel();
	registry.add_listener(
		Arc::new(Gate {
			release: Mutex::new(Some(parked)),
		}),
		None,
	);

	assert!(registry.remove(2).expect("must remove"));

	// Queries reflect the removal before the dispatch job has run.
	assert!(registry.extension_point("x.p").is_none());
	{
		let data = registry.inner.data.read();
		assert_eq!(
			data.objects.orphan_table().get("x.p"),
			Some(&vec![extension_id])
		);
		// The record itself stays resolvable until physical cleanup.
		assert!(data.objects.get_object(extension_id, ObjectKind::Extension).is_ok());
	}

	release.send(()).expect("gate must still be parked");
	registry.synchronize();
	let events = recorder.events();
	let last = events.last().expect("removal must broadcast");
	assert_eq!(last.bundles, vec![2]);
	assert_eq!(last.removed.len(), 1);
	assert_eq!(last.removed[0].0, extension_id);
	assert_eq!(last.removed_points, vec!["x.p".to_string()]);

	// After the dispatch completes, the removed id is gone.
	let data = registry.inner.data.read();
	assert!(matches!(
		data.objects.get_object(extension_id, ObjectKind::Extension),
		Err(RegistryError::StaleHandle { .. })
	));
}

#[test]
fn element_subtrees_are_reclaimed_after_dispatch() {
	let registry = registry();
	let description = NamespaceDescription::new("x", 1)
		.with_extension_point(ExtensionPointDescription::new("p", "Point"))
		.with_extension(
			ExtensionDescription::new("x.p", "Tree").with_element(
				ElementDescription::new("root").with_child(
					ElementDescription::new("child")
						.with_child(ElementDescription::new("leaf").with_value("deep")),
				),
			),
		);
	registry.add(description).expect("must add");

	let extension = registry
		.extension_point("x.p")
		.expect("point must exist")
		.extensions()
		.expect("must list")[0]
		.clone();
	let root = extension.configuration_elements().expect("must list")[0].clone();
	let child = root.children().expect("must list")[0].clone();
	let leaf = child.children().expect("must list")[0].clone();
	assert_eq!(leaf.value().expect("must resolve").as_deref(), Some("deep"));

	assert!(registry.remove(1).expect("must remove"));
	registry.synchronize();

	let data = registry.inner.data.read();
	for kind in [
		ObjectKind::ConfigurationElement,
		ObjectKind::ThirdLevelConfigurationElement,
	] {
		assert!(matches!(
			data.objects.get_object(leaf.id(), kind),
			Err(RegistryError::StaleHandle { .. })
		));
	}
}

#[test]
fn filtered_listeners_only_see_their_bundle() {
	let registry = registry();
	let filtered = Arc::new(Recorder::default());
	let unfiltered = Arc::new(Recorder::default());
	registry.add_listener(filtered.clone(), Some(1));
	registry.add_listener(unfiltered.clone(), None);

	registry.add(self_linked("b", 2)).expect("must add");
	registry.synchronize();

	assert!(filtered.events().is_empty());
	let events = unfiltered.events();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].bundles, vec![2]);
}

#[test]
fn batched_adds_broadcast_once() {
	let registry = registry();
	let recorder = Arc::new(Recorder::default());
	registry.add_listener(recorder.clone(), None);

	registry
		.add_all(vec![provider(1), contributor(2)])
		.expect("must add batch");
	registry.synchronize();

	let events = recorder.events();
	assert_eq!(events.len(), 1);
	// The link is attributed to the point's bundle.
	assert_eq!(events[0].bundles, vec![1]);
	assert_eq!(events[0].added.len(), 1);
}

#[test]
fn dispatches_run_in_submission_order() {
	let registry = registry();
	let recorder = Arc::new(Recorder::default());
	registry.add_listener(recorder.clone(), None);

	registry.add(self_linked("one", 1)).expect("must add");
	registry.add(self_linked("two", 2)).expect("must add");
	registry.synchronize();

	let events = recorder.events();
	assert_eq!(events.len(), 2);
	assert_eq!(events[0].bundles, vec![1]);
	assert_eq!(events[1].bundles, vec![2]);
}

struct OverlapDetector {
	active: AtomicBool,
	overlapped: AtomicBool,
}

impl RegistryChangeListener for OverlapDetector {
	fn registry_changed(&self, _event: &RegistryChangeEvent) {
		if self.active.swap(true, Ordering::SeqCst) {
			self.overlapped.store(true, Ordering::SeqCst);
		}
		std::thread::sleep(Duration::from_millis(20));
		self.active.store(false, Ordering::SeqCst);
	}
}

#[test]
fn dispatch_jobs_never_overlap() {
	let registry = registry();
	let detector = Arc::new(OverlapDetector {
		active: AtomicBool::new(false),
		overlapped: AtomicBool::new(false),
	});
	registry.add_listener(detector.clone(), None);

	registry.add(self_linked("one", 1)).expect("must add");
	registry.add(self_linked("two", 2)).expect("must add");
	registry.add(self_linked("three", 3)).expect("must add");
	registry.synchronize();

	assert!(!detector.overlapped.load(Ordering::SeqCst));
}

#[test]
fn listener_snapshots_are_fixed_at_scheduling() {
	let registry = registry();
	let early = Arc::new(Recorder::default());
	registry.add_listener(early.clone(), None);

	registry.add(self_linked("one", 1)).expect("must add");
	// Registered after the job was scheduled: sees nothing from it.
	let late = Arc::new(Recorder::default());
	registry.add_listener(late.clone(), None);
	registry.synchronize();
	assert_eq!(early.events().len(), 1);
	assert!(late.events().is_empty());

	// Deregistered after scheduling: still sees the snapshot it was in.
	let leaving: Arc<dyn RegistryChangeListener> = Arc::new(Recorder::default());
	registry.add_listener(leaving.clone(), None);
	registry.add(self_linked("two", 2)).expect("must add");
	registry.remove_listener(&leaving);
	registry.synchronize();
	assert_eq!(early.events().len(), 2);
	assert_eq!(late.events().len(), 1);
}

struct Panicker;

impl RegistryChangeListener for Panicker {
	fn registry_changed(&self, _event: &RegistryChangeEvent) {
		panic!("listener exploded");
	}
}

#[test]
fn listener_panics_are_aggregated_not_fatal() {
	let registry = registry();
	let recorder = Arc::new(Recorder::default());
	registry.add_listener(Arc::new(Panicker), None);
	registry.add_listener(recorder.clone(), None);

	registry.add(self_linked("one", 1)).expect("must add");
	registry.synchronize();

	assert_eq!(recorder.events().len(), 1, "later listeners still run");
	let status = registry.last_dispatch_status().expect("job must have run");
	assert!(!status.is_ok());
	assert_eq!(status.failures.len(), 1);
	assert!(status.failures[0].message.contains("listener exploded"));

	registry.add(self_linked("two", 2)).expect("must add");
	registry.synchronize();
	assert_eq!(recorder.events().len(), 2, "dispatch keeps running");
}

#[test]
fn removal_without_listeners_still_reclaims_records() {
	let registry = registry();
	registry.add(self_linked("one", 1)).expect("must add");
	let extension_id = registry
		.extension_point("one.p")
		.expect("point must exist")
		.extensions()
		.expect("must list")[0]
		.id();

	assert!(registry.remove(1).expect("must remove"));
	registry.synchronize();

	assert!(registry.inner.listeners.is_empty(), "the no-op listener is gone");
	let data = registry.inner.data.read();
	assert!(matches!(
		data.objects.get_object(extension_id, ObjectKind::Extension),
		Err(RegistryError::StaleHandle { .. })
	));
}

#[test]
fn contributor_can_leave_after_its_point_was_reclaimed() {
	let registry = registry();
	registry.add(contributor(1)).expect("must add contributor");
	registry.add(provider(2)).expect("must add provider");
	assert!(registry.remove(2).expect("must remove provider"));
	registry.synchronize();

	// A returning provider must not resurrect the reclaimed extension.
	registry.add(provider(3)).expect("must add provider again");
	let point = registry.extension_point("x.p").expect("point must exist");
	assert!(point.extensions().expect("must list").is_empty());

	assert!(registry.remove(1).expect("contributor must unlink cleanly"));
	assert!(!registry.has_namespace(1));
}

#[test]
fn removing_an_unknown_bundle_reports_false() {
	let registry = registry();
	assert!(!registry.remove(77).expect("must not fail"));
}

#[test]
fn anonymous_contributions_are_stored_but_never_linked() {
	let registry = registry();
	registry.add(provider(1)).expect("must add provider");
	registry
		.add(
			NamespaceDescription::anonymous(9)
				.with_extension(ExtensionDescription::new("x.p", "Hidden")),
		)
		.expect("must add anonymous");

	let point = registry.extension_point("x.p").expect("point must exist");
	assert!(point.extensions().expect("must list").is_empty());
	assert!(registry.has_namespace(9));
	assert_eq!(registry.namespaces(), vec!["x".to_string()]);
	{
		let data = registry.inner.data.read();
		assert!(data.objects.orphan_table().is_empty());
	}
	assert!(registry.remove(9).expect("must remove"));
}

#[test]
fn dotted_identifier_lookups() {
	let registry = registry();
	registry
		.add(
			NamespaceDescription::new("com.example.host", 1)
				.with_extension_point(ExtensionPointDescription::new("commands", "Commands"))
				.with_extension(
					ExtensionDescription::new("com.example.host.commands", "Open")
						.with_id("open")
						.with_element(
							ElementDescription::new("command").with_attribute("name", "open"),
						),
				),
		)
		.expect("must add");

	let extension = registry
		.extension("com.example.host.open")
		.expect("qualified lookup must work");
	assert_eq!(extension.label().expect("must resolve"), "Open");

	assert!(registry
		.extension_at("com.example.host.commands", "com.example.host.open")
		.is_some());
	assert!(registry
		.extension_in("com.example.host", "commands", "com.example.host.open")
		.is_some());
	assert!(registry.extension("com.example.host.closed").is_none());
	assert!(registry.extension("nodots").is_none());

	let elements = registry.configuration_elements_for("com.example.host.commands");
	assert_eq!(elements.len(), 1);
	assert_eq!(
		elements[0].attribute("name").expect("must resolve").as_deref(),
		Some("open")
	);
	assert!(registry.configuration_elements_for("nodots").is_empty());
	assert_eq!(
		registry
			.configuration_elements_for_extension("com.example.host", "commands", "com.example.host.open")
			.len(),
		1
	);
}

#[test]
fn deep_elements_know_their_declaring_extension() {
	let registry = registry();
	registry.add(
		NamespaceDescription::new("x", 1)
			.with_extension_point(ExtensionPointDescription::new("p", "Point"))
			.with_extension(
				ExtensionDescription::new("x.p", "Tree").with_id("tree").with_element(
					ElementDescription::new("root")
						.with_child(ElementDescription::new("child").with_child(
							ElementDescription::new("leaf"),
						)),
				),
			),
	)
	.expect("must add");

	let extension = registry.extension("x.tree").expect("must exist");
	let root = extension.configuration_elements().expect("must list")[0].clone();
	let leaf = root.children().expect("must list")[0]
		.children()
		.expect("must list")[0]
		.clone();

	let declaring = leaf.declaring_extension().expect("walk must terminate");
	assert_eq!(declaring, extension);
	assert_eq!(
		leaf.namespace().expect("must resolve").as_deref(),
		Some("x")
	);
}

#[test]
fn handles_compare_by_identity() {
	let registry = registry();
	registry.add(provider(1)).expect("must add");
	registry.add(self_linked("y", 2)).expect("must add");

	let first = registry.extension_point("x.p").expect("must exist");
	let second = registry.extension_point("x.p").expect("must exist");
	let other = registry.extension_point("y.p").expect("must exist");
	assert_eq!(first, second);
	assert_ne!(first, other);
}

#[test]
fn duplicate_points_are_rejected_at_the_facade() {
	let registry = registry();
	registry.add(provider(1)).expect("must add");
	let err = registry.add(provider(2)).expect_err("must reject");
	assert!(matches!(err, RegistryError::DuplicateExtensionPoint { .. }));
	assert!(!registry.has_namespace(2));
	assert!(registry.extension_point("x.p").is_some());
}

#[test]
fn cache_round_trip_preserves_observable_state() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let config = RegistryConfig::default()
		.with_cache_dir(dir.path())
		.with_stamp(1234);

	let first = ExtensionRegistry::new(config.clone());
	assert!(!first.initialized_from_cache());
	first
		.add(
			NamespaceDescription::new("com.example.host", 1)
				.with_extension_point(ExtensionPointDescription::new("commands", "Commands"))
				.with_extension(
					ExtensionDescription::new("com.example.host.commands", "Open")
						.with_id("open")
						.with_element(
							ElementDescription::new("command")
								.with_attribute("name", "open")
								.with_child(
									ElementDescription::new("keybinding")
										.with_child(ElementDescription::new("when").with_value("focus")),
								),
						),
				),
		)
		.expect("must add host");
	first.add(contributor(2)).expect("must add orphan contributor");
	first.stop();

	let second = ExtensionRegistry::new(config.clone());
	assert!(second.initialized_from_cache());
	assert_eq!(
		second.namespaces(),
		vec!["a".to_string(), "com.example.host".to_string()]
	);
	let extension = second
		.extension("com.example.host.open")
		.expect("extension must survive");
	assert_eq!(extension.label().expect("must resolve"), "Open");
	let root = extension.configuration_elements().expect("must list")[0].clone();
	let when = root.children().expect("must list")[0]
		.children()
		.expect("must list")[0]
		.clone();
	assert_eq!(when.value().expect("must resolve").as_deref(), Some("focus"));
	assert_eq!(
		when.declaring_extension().expect("walk must work"),
		extension
	);

	// The cached orphan re-links when its point finally arrives.
	second.add(provider(3)).expect("must add provider");
	let extensions = second
		.extension_point("x.p")
		.expect("point must exist")
		.extensions()
		.expect("must list");
	assert_eq!(extensions.len(), 1);
	assert_eq!(
		extensions[0].unique_identifier().expect("must resolve").as_deref(),
		Some("a.e1")
	);
	second.stop();

	let mismatched = ExtensionRegistry::new(
		RegistryConfig::default()
			.with_cache_dir(dir.path())
			.with_stamp(9999),
	);
	assert!(!mismatched.initialized_from_cache());
	assert!(mismatched.namespaces().is_empty());
}

#[test]
fn clean_registries_do_not_rewrite_the_cache() {
	let dir = tempfile::tempdir().expect("must create tempdir");
	let config = RegistryConfig::default().with_cache_dir(dir.path()).with_stamp(7);

	let first = ExtensionRegistry::new(config.clone());
	first.add(self_linked("one", 1)).expect("must add");
	first.stop();

	let table = dir.path().join(crate::cache::TABLE_FILE);
	let written = std::fs::metadata(&table).expect("cache must exist").len();

	let second = ExtensionRegistry::new(config);
	assert!(second.initialized_from_cache());
	second.stop();
	assert_eq!(
		std::fs::metadata(&table).expect("cache must remain").len(),
		written
	);
}
