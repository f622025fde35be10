//! Condition ledger
//!
//! Append/update semantics for typed status conditions. A condition list
//! holds at most one entry per type. Upserting a type that already exists
//! replaces it in place: when the status value is unchanged only reason and
//! message are refreshed and the transition time is kept; when the status
//! flips the transition time moves to the new condition's timestamp.
//!
//! Everything here is pure. Persisting the result is the caller's job and
//! goes through [`crate::retry::update_on_conflict`].

use crate::crd::Condition;

/// Return `conditions` with `new` merged in.
pub fn upsert<T>(conditions: &[Condition<T>], new: Condition<T>) -> Vec<Condition<T>>
where
    T: PartialEq + Clone,
{
    let mut merged = conditions.to_vec();
    upsert_in_place(&mut merged, new);
    merged
}

/// Merge `new` into `conditions` in place.
///
/// Position of an existing entry is preserved. Any duplicate entries of the
/// same type left over from older writers are collapsed into the first one.
pub fn upsert_in_place<T>(conditions: &mut Vec<Condition<T>>, new: Condition<T>)
where
    T: PartialEq,
{
    let Some(index) = conditions.iter().position(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return;
    };

    let mut seen = false;
    conditions.retain(|c| {
        if c.type_ != new.type_ {
            return true;
        }
        let first = !seen;
        seen = true;
        first
    });

    let existing = &mut conditions[index];
    if existing.status == new.status {
        existing.reason = new.reason;
        existing.message = new.message;
    } else {
        *existing = new;
    }
}

/// Find a condition by type
pub fn find<'a, T>(conditions: &'a [Condition<T>], type_: &T) -> Option<&'a Condition<T>>
where
    T: PartialEq,
{
    conditions.iter().find(|c| &c.type_ == type_)
}
