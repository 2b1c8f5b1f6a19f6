use crate::track::AttributeObservation;

/// Policy that decides whether a candidate observation replaces the stored one.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reconciliation {
    /// Replace only when the candidate carries a strictly higher `total_score`.
    /// Order independent: converges to the most confident value ever seen.
    #[default]
    BestEvidence,
    /// Replace unconditionally. The stored score may decrease.
    TrustLatest,
}

impl From<bool> for Reconciliation {
    /// `true` maps to [`Reconciliation::TrustLatest`].
    ///
    fn from(trust_latest: bool) -> Self {
        if trust_latest {
            Reconciliation::TrustLatest
        } else {
            Reconciliation::BestEvidence
        }
    }
}

/// Decides which observation an attribute slot keeps.
///
/// # Returns
/// * `.0` - the observation the slot must hold after reconciliation
/// * `.1` - `true` when the stored value changed (scores alone never count as a change)
///
pub fn reconcile(
    current: &AttributeObservation,
    candidate: &AttributeObservation,
    mode: Reconciliation,
) -> (AttributeObservation, bool) {
    let adopt = match mode {
        Reconciliation::TrustLatest => true,
        Reconciliation::BestEvidence => candidate.total_score > current.total_score,
    };

    if adopt {
        (candidate.clone(), candidate.value != current.value)
    } else {
        (current.clone(), false)
    }
}

/// In-place flavour of [`reconcile`] used by the track slots.
///
pub(crate) fn reconcile_slot(
    slot: &mut AttributeObservation,
    candidate: &AttributeObservation,
    mode: Reconciliation,
) -> bool {
    let (next, changed) = reconcile(slot, candidate, mode);
    *slot = next;
    changed
}
