#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Long running loops owned by a terminal node, such as the Sync Client and
//! the asset worker.
//!
//! Each run gets its own [`Stopper`]. Stopping closes it and waits up to the
//! grace period before aborting, so a shutdown never hangs on a stuck request.

use std::{
	collections::BTreeMap,
	future::{Future, IntoFuture},
	panic::AssertUnwindSafe,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
	time::Duration,
};

use async_channel as chan;
use futures::{future::BoxFuture, FutureExt};
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tracing::{error, info, instrument, warn};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

type ActorFn = Arc<dyn Fn(Stopper) -> BoxFuture<'static, ()> + Send + Sync>;

/// How the last run of an actor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
	/// Returned on its own or after a stop request.
	Finished,
	Panicked,
	/// Ignored the stop request for the whole grace period.
	Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorStatus {
	pub name: &'static str,
	pub running: bool,
	pub runs: u32,
	pub last_exit: Option<Exit>,
}

struct Slot {
	actor_fn: ActorFn,
	task: Option<JoinHandle<Exit>>,
	running: Arc<AtomicBool>,
	stop_tx: Option<chan::Sender<()>>,
	runs: u32,
	last_exit: Option<Exit>,
}

impl Slot {
	fn status(&self, name: &'static str) -> ActorStatus {
		ActorStatus {
			name,
			running: self.running.load(Ordering::Acquire),
			runs: self.runs,
			last_exit: self.last_exit,
		}
	}

	/// Collects the outcome of a run that ended without being stopped.
	async fn reap(&mut self) {
		if let Some(task) = self.task.take() {
			self.last_exit = Some(task.await.unwrap_or(Exit::Panicked));
		}
	}
}

/// Every actor of a node, by name.
pub struct Actors {
	slots: Mutex<BTreeMap<&'static str, Slot>>,
	grace_period: Duration,
}

impl Default for Actors {
	fn default() -> Self {
		Self::with_grace_period(DEFAULT_GRACE_PERIOD)
	}
}

impl Actors {
	#[must_use]
	pub fn with_grace_period(grace_period: Duration) -> Self {
		Self {
			slots: Mutex::default(),
			grace_period,
		}
	}

	pub async fn declare<F, Fut>(&self, name: &'static str, actor_fn: F, autostart: bool)
	where
		F: Fn(Stopper) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let replaced = self.slots.lock().await.insert(
			name,
			Slot {
				actor_fn: Arc::new(move |stop| actor_fn(stop).boxed()),
				task: None,
				running: Arc::new(AtomicBool::new(false)),
				stop_tx: None,
				runs: 0,
				last_exit: None,
			},
		);

		if let Some(mut old) = replaced {
			warn!(actor = name, "Actor declared twice, stopping the old one");
			self.halt(name, &mut old).await;
		}

		if autostart {
			self.start(name).await;
		}
	}

	#[instrument(skip(self))]
	pub async fn start(&self, name: &'static str) {
		let mut slots = self.slots.lock().await;
		let Some(slot) = slots.get_mut(name) else {
			warn!("Tried to start an undeclared actor");
			return;
		};

		if slot.running.load(Ordering::Acquire) {
			warn!("Actor already running");
			return;
		}

		slot.reap().await;

		let (stop_tx, stop_rx) = chan::bounded(1);
		let run = (slot.actor_fn)(Stopper(stop_rx));
		let running = Arc::clone(&slot.running);
		running.store(true, Ordering::Release);

		slot.task = Some(tokio::spawn(async move {
			let exit = match AssertUnwindSafe(run).catch_unwind().await {
				Ok(()) => Exit::Finished,
				Err(_) => {
					error!(actor = name, "Actor panicked");
					Exit::Panicked
				}
			};
			running.store(false, Ordering::Release);
			exit
		}));
		slot.stop_tx = Some(stop_tx);
		slot.runs += 1;

		info!(run = slot.runs, "Actor started");
	}

	#[instrument(skip(self))]
	pub async fn stop(&self, name: &'static str) {
		let mut slots = self.slots.lock().await;
		if let Some(slot) = slots.get_mut(name) {
			self.halt(name, slot).await;
		}
	}

	async fn halt(&self, name: &'static str, slot: &mut Slot) {
		if let Some(stop_tx) = slot.stop_tx.take() {
			stop_tx.close();
		}

		let Some(mut task) = slot.task.take() else {
			return;
		};

		let exit = match timeout(self.grace_period, &mut task).await {
			Ok(Ok(exit)) => exit,
			Ok(Err(_)) => Exit::Panicked,
			Err(_) => {
				error!(actor = name, grace_period = ?self.grace_period, "Actor ignored the stop request, aborting");
				task.abort();
				Exit::Aborted
			}
		};

		slot.running.store(false, Ordering::Release);
		slot.last_exit = Some(exit);

		info!(actor = name, ?exit, "Actor stopped");
	}

	/// Stops every actor, one after the other.
	pub async fn stop_all(&self) {
		let mut slots = self.slots.lock().await;
		for (name, slot) in slots.iter_mut() {
			self.halt(*name, slot).await;
		}
	}

	pub async fn is_running(&self, name: &'static str) -> bool {
		self.slots
			.lock()
			.await
			.get(name)
			.is_some_and(|slot| slot.running.load(Ordering::Acquire))
	}

	/// Sorted by name.
	pub async fn statuses(&self) -> Vec<ActorStatus> {
		self.slots
			.lock()
			.await
			.iter()
			.map(|(name, slot)| slot.status(*name))
			.collect()
	}
}

/// Handed to each run of an actor. Resolves, and [`Stopper::check_stop`]
/// turns true, once the run was asked to stop.
pub struct Stopper(chan::Receiver<()>);

impl Stopper {
	#[must_use]
	pub fn check_stop(&self) -> bool {
		self.0.is_closed()
	}
}

pin_project_lite::pin_project! {
	pub struct StopRequested<'recv> {
		#[pin]
		recv: chan::Recv<'recv, ()>,
	}
}

impl Future for StopRequested<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		// Nothing is ever sent, the channel only closes
		self.project().recv.poll(cx).map(|_| ())
	}
}

impl<'recv> IntoFuture for &'recv Stopper {
	type Output = ();
	type IntoFuture = StopRequested<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		StopRequested {
			recv: self.0.recv(),
		}
	}
}
