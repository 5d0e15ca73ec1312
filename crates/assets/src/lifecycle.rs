use serde::Serialize;

use crate::AssetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallState {
	Installing,
	InstalledWaiting,
	Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssetVersion {
	pub version: u64,
	pub install_state: InstallState,
}

/// Coarse phase of the worker, as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerPhase {
	None,
	Installing,
	InstalledWaiting,
	Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
	pub phase: WorkerPhase,
	pub active: Option<u64>,
	/// The version being downloaded, or else the one waiting for activation.
	pub incoming: Option<AssetVersion>,
	/// Fully staged and activatable, even while a newer one downloads.
	pub waiting: Option<u64>,
}

/// Outcome of a successful activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
	pub version: u64,
	/// Set at most once per version, and never for the first version a
	/// terminal ever activates since nothing is running to reload.
	pub reload: bool,
}

/// Pure state machine: NONE -> INSTALLING -> INSTALLED_WAITING -> ACTIVE.
///
/// At most one version is active, one is waiting and one is downloading. A
/// finished download replaces the waiting version; a failed one leaves it
/// untouched. Versions not above all three are ignored.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
	active: Option<u64>,
	waiting: Option<u64>,
	installing: Option<u64>,
	reloaded_for: Option<u64>,
}

impl Lifecycle {
	#[must_use]
	pub fn restore(active: Option<u64>, staged: Option<u64>) -> Self {
		Self {
			active,
			waiting: staged.filter(|staged| active.map_or(true, |active| *staged > active)),
			installing: None,
			reloaded_for: active,
		}
	}

	#[must_use]
	pub const fn active(&self) -> Option<u64> {
		self.active
	}

	#[must_use]
	pub fn incoming(&self) -> Option<AssetVersion> {
		match (self.installing, self.waiting) {
			(Some(version), _) => Some(AssetVersion {
				version,
				install_state: InstallState::Installing,
			}),
			(None, Some(version)) => Some(AssetVersion {
				version,
				install_state: InstallState::InstalledWaiting,
			}),
			(None, None) => None,
		}
	}

	#[must_use]
	pub const fn waiting(&self) -> Option<u64> {
		self.waiting
	}

	fn newest_known(&self) -> Option<u64> {
		[self.active, self.waiting, self.installing]
			.into_iter()
			.flatten()
			.max()
	}

	/// Whether `version` is worth downloading.
	#[must_use]
	pub fn wants(&self, version: u64) -> bool {
		self.newest_known().map_or(true, |newest| version > newest)
	}

	pub fn begin_install(&mut self, version: u64) -> Result<(), AssetError> {
		if !self.wants(version) {
			return Err(AssetError::NotNewer {
				candidate: version,
				current: self.newest_known().unwrap_or_default(),
			});
		}

		self.installing = Some(version);

		Ok(())
	}

	/// Returns `false` if `version` is no longer the one being installed.
	pub fn finish_install(&mut self, version: u64) -> bool {
		if self.installing != Some(version) {
			return false;
		}

		self.installing = None;
		self.waiting = Some(version);
		true
	}

	/// Drops a failed download; an older version already waiting stays activatable.
	pub fn abort_install(&mut self, version: u64) {
		if self.installing == Some(version) {
			self.installing = None;
		}
	}

	/// Promotes the waiting version to active.
	///
	/// Asking again for the version that is already active succeeds without
	/// another reload.
	pub fn activate(&mut self, version: u64) -> Result<Activation, AssetError> {
		if self.active == Some(version) {
			return Ok(Activation {
				version,
				reload: false,
			});
		}

		if self.waiting != Some(version) {
			return Err(AssetError::NothingToActivate);
		}

		let had_active = self.active.is_some();
		self.active = Some(version);
		self.waiting = None;

		let reload = had_active && self.reloaded_for != Some(version);
		self.reloaded_for = Some(version);

		Ok(Activation { version, reload })
	}

	#[must_use]
	pub fn snapshot(&self) -> LifecycleSnapshot {
		let phase = match (self.installing, self.waiting, self.active) {
			(Some(_), _, _) => WorkerPhase::Installing,
			(None, Some(_), _) => WorkerPhase::InstalledWaiting,
			(None, None, Some(_)) => WorkerPhase::Active,
			(None, None, None) => WorkerPhase::None,
		};

		LifecycleSnapshot {
			phase,
			active: self.active,
			incoming: self.incoming(),
			waiting: self.waiting,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_waits_until_activated() {
		let mut lifecycle = Lifecycle::restore(Some(1), None);
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::Active);

		lifecycle.begin_install(2).unwrap();
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::Installing);
		assert!(matches!(
			lifecycle.activate(2),
			Err(AssetError::NothingToActivate)
		));

		assert!(lifecycle.finish_install(2));
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::InstalledWaiting);
		assert_eq!(lifecycle.active(), Some(1));

		let activation = lifecycle.activate(2).unwrap();
		assert_eq!(activation, Activation { version: 2, reload: true });
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::Active);
	}

	#[test]
	fn repeated_activation_does_not_reload_twice() {
		let mut lifecycle = Lifecycle::restore(Some(1), Some(2));

		assert!(lifecycle.activate(2).unwrap().reload);
		assert!(!lifecycle.activate(2).unwrap().reload);
	}

	#[test]
	fn first_version_is_activated_without_reload() {
		let mut lifecycle = Lifecycle::default();
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::None);

		lifecycle.begin_install(1).unwrap();
		lifecycle.finish_install(1);

		assert!(!lifecycle.activate(1).unwrap().reload);
	}

	#[test]
	fn stale_versions_are_not_installed() {
		let mut lifecycle = Lifecycle::restore(Some(3), None);

		assert!(!lifecycle.wants(3));
		assert!(matches!(
			lifecycle.begin_install(2),
			Err(AssetError::NotNewer { candidate: 2, current: 3 })
		));
	}

	#[test]
	fn newer_manifest_replaces_waiting_version_once_staged() {
		let mut lifecycle = Lifecycle::restore(Some(1), Some(2));
		assert_eq!(lifecycle.waiting(), Some(2));

		lifecycle.begin_install(3).unwrap();
		assert_eq!(lifecycle.waiting(), Some(2));
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::Installing);
		assert!(!lifecycle.wants(3));

		assert!(lifecycle.finish_install(3));
		assert_eq!(lifecycle.waiting(), Some(3));
		assert!(!lifecycle.finish_install(2));
		assert!(matches!(
			lifecycle.activate(2),
			Err(AssetError::NothingToActivate)
		));
	}

	#[test]
	fn failed_download_keeps_the_waiting_version() {
		let mut lifecycle = Lifecycle::restore(Some(1), Some(2));

		lifecycle.begin_install(3).unwrap();
		lifecycle.abort_install(3);

		assert_eq!(lifecycle.waiting(), Some(2));
		assert_eq!(lifecycle.snapshot().phase, WorkerPhase::InstalledWaiting);
		assert!(lifecycle.wants(3));
		assert_eq!(
			lifecycle.activate(2).unwrap(),
			Activation { version: 2, reload: true }
		);
	}

	#[test]
	fn failed_install_keeps_active_version() {
		let mut lifecycle = Lifecycle::restore(Some(1), None);
		lifecycle.begin_install(2).unwrap();
		lifecycle.abort_install(2);

		assert_eq!(lifecycle.snapshot(), LifecycleSnapshot {
			phase: WorkerPhase::Active,
			active: Some(1),
			incoming: None,
			waiting: None,
		});
		assert!(lifecycle.wants(2));
	}

	#[test]
	fn restore_ignores_staged_versions_not_above_active() {
		let lifecycle = Lifecycle::restore(Some(4), Some(4));
		assert_eq!(lifecycle.incoming(), None);
	}
}
