//! Asynchronous event dispatch with a single-outstanding-job discipline.
//!
//! One dedicated worker thread owns the job queue, so at most one dispatch
//! runs at a time and jobs execute in submission order. Each job works on
//! the listener and delta snapshots captured when it was scheduled, and
//! only after every listener has run does it physically reclaim the
//! records the mutation removed.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace, warn};

use crate::delta::{DeltaKind, RegistryDelta};
use crate::event::{ListenerEntry, RegistryChangeEvent};
use crate::object::{BundleId, ObjectId, ObjectManager};
use crate::registry::RegistryInner;

/// One caught listener panic.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
	/// Payload of the panic, when it carried a message.
	pub message: String,
}

/// Aggregate outcome of one dispatch job.
///
/// Listener failures never abort delivery or cleanup; they accumulate
/// here instead.
#[derive(Debug, Clone, Default)]
pub struct DispatchStatus {
	pub failures: Vec<ListenerFailure>,
}

impl DispatchStatus {
	/// True when every listener returned normally.
	pub fn is_ok(&self) -> bool {
		self.failures.is_empty()
	}
}

enum Job {
	Broadcast {
		listeners: Arc<Vec<ListenerEntry>>,
		deltas: Arc<FxHashMap<BundleId, RegistryDelta>>,
		registry: Weak<RegistryInner>,
	},
	Barrier(mpsc::Sender<()>),
}

/// Owner of the dispatch worker thread.
pub(crate) struct Dispatcher {
	sender: Mutex<Option<mpsc::Sender<Job>>>,
	worker: Mutex<Option<JoinHandle<()>>>,
	last_status: Arc<Mutex<Option<DispatchStatus>>>,
}

impl Dispatcher {
	pub fn new() -> Self {
		let (sender, receiver) = mpsc::channel();
		let last_status = Arc::new(Mutex::new(None));
		let status_slot = last_status.clone();
		let worker = std::thread::Builder::new()
			.name("registry-dispatch".into())
			.spawn(move || run(receiver, status_slot))
			.expect("failed to spawn registry dispatch thread");
		Self {
			sender: Mutex::new(Some(sender)),
			worker: Mutex::new(Some(worker)),
			last_status,
		}
	}

	/// Enqueues one broadcast; never blocks the scheduling writer.
	pub fn schedule(
		&self,
		listeners: Arc<Vec<ListenerEntry>>,
		deltas: Arc<FxHashMap<BundleId, RegistryDelta>>,
		registry: Weak<RegistryInner>,
	) {
		let sender = self.sender.lock();
		let Some(sender) = sender.as_ref() else {
			warn!("dispatch.schedule_after_shutdown");
			return;
		};
		if sender
			.send(Job::Broadcast {
				listeners,
				deltas,
				registry,
			})
			.is_err()
		{
			warn!("dispatch.worker_gone");
		}
	}

	/// Blocks until every previously scheduled job has completed.
	pub fn synchronize(&self) {
		let sender = self.sender.lock().as_ref().cloned();
		let Some(sender) = sender else { return };
		let (ack, done) = mpsc::channel();
		if sender.send(Job::Barrier(ack)).is_err() {
			return;
		}
		let _ = done.recv();
	}

	/// Aggregate status of the most recently completed broadcast.
	pub fn last_status(&self) -> Option<DispatchStatus> {
		self.last_status.lock().clone()
	}

	/// Stops the worker after the queue drains. Idempotent.
	pub fn shutdown(&self) {
		drop(self.sender.lock().take());
		let worker = self.worker.lock().take();
		if let Some(worker) = worker {
			if worker.join().is_err() {
				warn!("dispatch.worker_panicked");
			}
		}
	}
}

fn run(receiver: mpsc::Receiver<Job>, status_slot: Arc<Mutex<Option<DispatchStatus>>>) {
	while let Ok(job) = receiver.recv() {
		match job {
			Job::Broadcast {
				listeners,
				deltas,
				registry,
			} => {
				let status = broadcast(&listeners, &deltas);
				cleanup_removed(&deltas, &registry);
				*status_slot.lock() = Some(status);
			}
			Job::Barrier(ack) => {
				let _ = ack.send(());
			}
		}
	}
}

fn broadcast(
	listeners: &[ListenerEntry],
	deltas: &Arc<FxHashMap<BundleId, RegistryDelta>>,
) -> DispatchStatus {
	let mut status = DispatchStatus::default();
	for entry in listeners {
		if let Some(filter) = entry.filter {
			if !deltas.contains_key(&filter) {
				continue;
			}
		}
		let event = RegistryChangeEvent::new(deltas.clone(), entry.filter);
		let outcome = catch_unwind(AssertUnwindSafe(|| entry.listener.registry_changed(&event)));
		if let Err(payload) = outcome {
			let message = panic_message(payload);
			error!(message = %message, "dispatch.listener_failure");
			status.failures.push(ListenerFailure { message });
		}
	}
	status
}

/// Physically removes every record the broadcast deltas marked as gone:
/// each removed extension with its configuration-element subtree, then
/// each removed extension point.
///
/// Runs under the write lock, after all listeners; the queue discipline
/// keeps it ahead of any later dispatch.
fn cleanup_removed(deltas: &FxHashMap<BundleId, RegistryDelta>, registry: &Weak<RegistryInner>) {
	let Some(inner) = registry.upgrade() else {
		return;
	};
	let mut data = inner.data.write();
	let objects = &mut data.objects;

	let mut doomed: Vec<ObjectId> = Vec::new();
	for delta in deltas.values() {
		for extension_delta in delta.extension_deltas() {
			if extension_delta.kind != DeltaKind::Removed {
				continue;
			}
			collect_subtree(objects, extension_delta.extension, &mut doomed);
		}
	}
	for &id in &doomed {
		objects.remove(id, true);
	}

	let mut points = 0usize;
	for delta in deltas.values() {
		for point in delta.removed_points() {
			objects.remove(point.id, true);
			points += 1;
		}
	}
	trace!(rows = doomed.len(), points, "dispatch.cleanup");
}

fn collect_subtree(objects: &ObjectManager, id: ObjectId, out: &mut Vec<ObjectId>) {
	out.push(id);
	if let Some(record) = objects.record(id) {
		for &child in record.raw_children() {
			collect_subtree(objects, child, out);
		}
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&'static str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"listener panicked".to_string()
	}
}
