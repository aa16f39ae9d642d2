//! crates/lesson_hub_core/src/access.rs
//!
//! Decides whose data a session is looking at and whether it may change it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a shared-link parameter is allowed to do.
///
/// `TrustIdentity` keeps the historical behavior: the parameter is a raw
/// identity id and anyone holding it can read that identity's schedule, with
/// no expiry or revocation. `Disabled` ignores the parameter entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePolicy {
    #[default]
    TrustIdentity,
    Disabled,
}

/// The resolved viewing scope. Derived, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessScope {
    viewer: Option<Uuid>,
    target: Option<Uuid>,
}

impl AccessScope {
    /// Builds a scope from the signed-in identity and an optional shared-link
    /// target. A present target wins unconditionally under `TrustIdentity`.
    pub fn resolve(viewer: Option<Uuid>, shared_target: Option<Uuid>, policy: SharePolicy) -> Self {
        let target = match (policy, shared_target) {
            (SharePolicy::TrustIdentity, Some(target)) => Some(target),
            _ => viewer,
        };
        Self { viewer, target }
    }

    pub fn viewer(&self) -> Option<Uuid> {
        self.viewer
    }

    /// The identity whose data is read. `None` means nothing can be loaded.
    pub fn target(&self) -> Option<Uuid> {
        self.target
    }

    pub fn is_owner(&self) -> bool {
        self.viewer.is_some() && self.viewer == self.target
    }

    /// The owner id to write under, or `None` when mutations must be refused.
    pub fn writable_owner(&self) -> Option<Uuid> {
        if self.is_owner() {
            self.viewer
        } else {
            None
        }
    }
}

/// Per-session resolution state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScopeState {
    #[default]
    Unresolved,
    /// Waiting on the ambient session check.
    Resolving { shared_target: Option<Uuid> },
    /// Signed out and no shared link: nothing to show.
    Anonymous,
    AnonymousWithTarget { target: Uuid },
    AuthenticatedOwner { owner: Uuid },
    AuthenticatedViewingOther { viewer: Uuid, target: Uuid },
}

/// Drives [`ScopeState`] through `unresolved -> resolving -> terminal`, and back
/// into `resolving` on every sign-in or sign-out.
#[derive(Debug, Clone, Default)]
pub struct ScopeResolver {
    policy: SharePolicy,
    shared_target: Option<Uuid>,
    state: ScopeState,
    scope: AccessScope,
}

impl ScopeResolver {
    pub fn new(policy: SharePolicy, shared_target: Option<Uuid>) -> Self {
        Self {
            policy,
            shared_target,
            ..Default::default()
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn scope(&self) -> AccessScope {
        self.scope
    }

    /// Starts (or restarts) resolution. Until it completes the scope is empty,
    /// so no reads and no writes go through.
    pub fn begin(&mut self) {
        self.state = ScopeState::Resolving {
            shared_target: self.shared_target,
        };
        self.scope = AccessScope::default();
    }

    /// Completes resolution with the identity found in the ambient session.
    pub fn complete(&mut self, viewer: Option<Uuid>) -> AccessScope {
        let scope = AccessScope::resolve(viewer, self.shared_target, self.policy);
        self.state = match (scope.viewer(), scope.target()) {
            (None, None) => ScopeState::Anonymous,
            (None, Some(target)) => ScopeState::AnonymousWithTarget { target },
            (Some(viewer), Some(target)) if viewer == target => {
                ScopeState::AuthenticatedOwner { owner: viewer }
            }
            (Some(viewer), Some(target)) => {
                ScopeState::AuthenticatedViewingOther { viewer, target }
            }
            // resolve() never drops a present viewer's target.
            (Some(viewer), None) => ScopeState::AuthenticatedOwner { owner: viewer },
        };
        self.scope = scope;
        scope
    }

    /// A sign-in or sign-out event: re-enter resolution with the new identity.
    pub fn identity_changed(&mut self, viewer: Option<Uuid>) -> AccessScope {
        self.begin();
        self.complete(viewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_signed_in_without_share_is_owner() {
        let (me, _) = ids();
        let scope = AccessScope::resolve(Some(me), None, SharePolicy::TrustIdentity);
        assert_eq!(scope.target(), Some(me));
        assert!(scope.is_owner());
        assert_eq!(scope.writable_owner(), Some(me));
    }

    #[test]
    fn test_shared_target_overrides_viewer() {
        let (me, other) = ids();
        let scope = AccessScope::resolve(Some(me), Some(other), SharePolicy::TrustIdentity);
        assert_eq!(scope.target(), Some(other));
        assert!(!scope.is_owner());
        assert_eq!(scope.writable_owner(), None);
    }

    #[test]
    fn test_own_id_in_share_link_still_owner() {
        let (me, _) = ids();
        let scope = AccessScope::resolve(Some(me), Some(me), SharePolicy::TrustIdentity);
        assert!(scope.is_owner());
    }

    #[test]
    fn test_anonymous_reader_is_never_owner() {
        let (_, other) = ids();
        let scope = AccessScope::resolve(None, Some(other), SharePolicy::TrustIdentity);
        assert_eq!(scope.target(), Some(other));
        assert!(!scope.is_owner());

        let nobody = AccessScope::resolve(None, None, SharePolicy::TrustIdentity);
        assert_eq!(nobody.target(), None);
        assert!(!nobody.is_owner());
    }

    #[test]
    fn test_disabled_policy_ignores_share_parameter() {
        let (me, other) = ids();
        let scope = AccessScope::resolve(Some(me), Some(other), SharePolicy::Disabled);
        assert_eq!(scope.target(), Some(me));
        assert!(scope.is_owner());
        assert_eq!(
            AccessScope::resolve(None, Some(other), SharePolicy::Disabled).target(),
            None
        );
    }

    #[test]
    fn test_resolver_state_transitions() {
        let (me, other) = ids();
        let mut resolver = ScopeResolver::new(SharePolicy::TrustIdentity, Some(other));
        assert_eq!(resolver.state(), ScopeState::Unresolved);

        resolver.begin();
        assert_eq!(
            resolver.state(),
            ScopeState::Resolving { shared_target: Some(other) }
        );
        assert_eq!(resolver.scope().target(), None);

        resolver.complete(None);
        assert_eq!(resolver.state(), ScopeState::AnonymousWithTarget { target: other });

        resolver.identity_changed(Some(me));
        assert_eq!(
            resolver.state(),
            ScopeState::AuthenticatedViewingOther { viewer: me, target: other }
        );
    }

    #[test]
    fn test_resolver_owner_and_anonymous() {
        let (me, _) = ids();
        let mut resolver = ScopeResolver::new(SharePolicy::TrustIdentity, None);
        resolver.begin();
        resolver.complete(Some(me));
        assert_eq!(resolver.state(), ScopeState::AuthenticatedOwner { owner: me });

        resolver.identity_changed(None);
        assert_eq!(resolver.state(), ScopeState::Anonymous);
        assert!(!resolver.scope().is_owner());
    }
}
