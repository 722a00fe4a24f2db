//! Group registry: sessions, groups and membership.
//!
//! The registry keeps both halves of the membership relation in one
//! structure: group → member sessions (for broadcast) and session → joined
//! groups (for cleanup on disconnect). Every operation updates both halves
//! before it returns, so callers that hold the registry behind a single lock
//! get each operation as one atomic step.
//!
//! Groups must be created explicitly and outlive their members: an empty
//! group stays until someone removes it.
//!
//! The registry is generic over the per-session sink `S` so it can be tested
//! without any I/O. Operations that feed a notification return a snapshot of
//! the affected members taken in the same step as the mutation.

use std::collections::{BTreeSet, HashMap};

/// Server-assigned connection identifier.
pub type SessionId = u64;

/// One member in a membership snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member<S> {
    /// Member session
    pub session_id: SessionId,
    /// Sink for the member's outbound frames
    pub sink: S,
}

/// Result of [`GroupRegistry::create_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Group did not exist and now does
    Created,
    /// Name already taken; nothing changed
    AlreadyExists,
}

/// Result of [`GroupRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome<S> {
    /// Joined; `others` were members before the join
    Joined {
        /// Members to notify of the arrival
        others: Vec<Member<S>>,
    },
    /// Session was already a member
    AlreadyMember,
    /// Group does not exist
    NoSuchGroup,
    /// Session is not registered
    UnknownSession,
}

/// Result of [`GroupRegistry::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome<S> {
    /// Left; `remaining` are the members after the departure
    Left {
        /// Members to notify of the departure
        remaining: Vec<Member<S>>,
    },
    /// Session was not a member
    NotMember,
    /// Group does not exist
    NoSuchGroup,
}

/// Result of [`GroupRegistry::members_for_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome<S> {
    /// Sender is a member; deliver to all of `members` (sender included)
    Deliver {
        /// Current members
        members: Vec<Member<S>>,
    },
    /// Sender is not a member
    NotMember,
    /// Group does not exist
    NoSuchGroup,
}

/// What remains to be announced after a session is unregistered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure<S> {
    /// Display name of the departed session
    pub name: String,
    /// Each group the session had joined, with the members still in it
    pub groups: Vec<(String, Vec<Member<S>>)>,
}

#[derive(Debug)]
struct SessionEntry<S> {
    name: String,
    sink: S,
    groups: BTreeSet<String>,
}

/// Registry for sessions and group membership.
#[derive(Debug)]
pub struct GroupRegistry<S> {
    /// Session ID → name, sink and joined groups
    sessions: HashMap<SessionId, SessionEntry<S>>,
    /// Group name → member session IDs
    groups: HashMap<String, BTreeSet<SessionId>>,
}

impl<S> Default for GroupRegistry<S> {
    fn default() -> Self {
        Self { sessions: HashMap::new(), groups: HashMap::new() }
    }
}

impl<S: Clone> GroupRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected session.
    ///
    /// Returns `false` if the ID is already registered. Display names are
    /// not required to be unique.
    pub fn register_session(&mut self, session_id: SessionId, name: String, sink: S) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }
        self.sessions.insert(session_id, SessionEntry { name, sink, groups: BTreeSet::new() });
        true
    }

    /// Unregister a session and remove it from every group it joined.
    ///
    /// Groups themselves stay, even when this leaves them empty.
    pub fn unregister_session(&mut self, session_id: SessionId) -> Option<Departure<S>> {
        let entry = self.sessions.remove(&session_id)?;

        let mut groups = Vec::with_capacity(entry.groups.len());
        for group in entry.groups {
            if let Some(members) = self.groups.get_mut(&group) {
                members.remove(&session_id);
            }
            let remaining = self.snapshot(&group);
            groups.push((group, remaining));
        }

        Some(Departure { name: entry.name, groups })
    }

    /// Create `group` if no group has that name.
    pub fn create_group(&mut self, group: &str) -> CreateOutcome {
        if self.groups.contains_key(group) {
            return CreateOutcome::AlreadyExists;
        }
        self.groups.insert(group.to_string(), BTreeSet::new());
        CreateOutcome::Created
    }

    /// Current members of `group`. `None` if the group doesn't exist.
    pub fn lookup(&self, group: &str) -> Option<Vec<Member<S>>> {
        self.groups.contains_key(group).then(|| self.snapshot(group))
    }

    /// Add a session to a group.
    pub fn join(&mut self, group: &str, session_id: SessionId) -> JoinOutcome<S> {
        let Some(members) = self.groups.get(group) else {
            return JoinOutcome::NoSuchGroup;
        };
        if members.contains(&session_id) {
            return JoinOutcome::AlreadyMember;
        }
        if !self.sessions.contains_key(&session_id) {
            return JoinOutcome::UnknownSession;
        }

        let others = self.snapshot(group);
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.groups.insert(group.to_string());
        }
        self.groups.entry(group.to_string()).or_default().insert(session_id);

        JoinOutcome::Joined { others }
    }

    /// Remove a session from a group.
    pub fn leave(&mut self, group: &str, session_id: SessionId) -> LeaveOutcome<S> {
        let Some(members) = self.groups.get_mut(group) else {
            return LeaveOutcome::NoSuchGroup;
        };
        if !members.remove(&session_id) {
            return LeaveOutcome::NotMember;
        }
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.groups.remove(group);
        }

        LeaveOutcome::Left { remaining: self.snapshot(group) }
    }

    /// Delete a group, evicting all its members.
    ///
    /// Returns the evicted members, or `None` if the group doesn't exist.
    pub fn delete_group(&mut self, group: &str) -> Option<Vec<Member<S>>> {
        let evicted = self.snapshot(group);
        let members = self.groups.remove(group)?;

        for session_id in members {
            if let Some(entry) = self.sessions.get_mut(&session_id) {
                entry.groups.remove(group);
            }
        }

        Some(evicted)
    }

    /// Members to deliver a post from `session_id` to.
    ///
    /// Only members may post to a group.
    pub fn members_for_post(&self, group: &str, session_id: SessionId) -> PostOutcome<S> {
        match self.groups.get(group) {
            None => PostOutcome::NoSuchGroup,
            Some(members) if !members.contains(&session_id) => PostOutcome::NotMember,
            Some(_) => PostOutcome::Deliver { members: self.snapshot(group) },
        }
    }

    /// Check if a session is a member of a group.
    pub fn is_member(&self, group: &str, session_id: SessionId) -> bool {
        self.groups.get(group).is_some_and(|m| m.contains(&session_id))
    }

    /// Check if a group exists.
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Groups a session has joined, in name order.
    pub fn groups_for_session(&self, session_id: SessionId) -> impl Iterator<Item = &str> + '_ {
        self.sessions.get(&session_id).into_iter().flat_map(|e| e.groups.iter().map(String::as_str))
    }

    /// Display name of a session.
    pub fn session_name(&self, session_id: SessionId) -> Option<&str> {
        self.sessions.get(&session_id).map(|e| e.name.as_str())
    }

    /// All group names, in no particular order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups.keys().map(String::as_str)
    }

    /// Display names of the members of `group`, in session order.
    pub fn member_names(&self, group: &str) -> Option<Vec<String>> {
        let members = self.groups.get(group)?;
        Some(
            members
                .iter()
                .filter_map(|id| self.sessions.get(id))
                .map(|entry| entry.name.clone())
                .collect(),
        )
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Verify that both halves of the membership relation agree.
    ///
    /// Returns a description of the first mismatch found.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (group, members) in &self.groups {
            for session_id in members {
                let Some(entry) = self.sessions.get(session_id) else {
                    return Err(format!("group {group:?} lists unregistered session {session_id}"));
                };
                if !entry.groups.contains(group) {
                    return Err(format!(
                        "group {group:?} lists session {session_id}, which does not list it"
                    ));
                }
            }
        }

        for (session_id, entry) in &self.sessions {
            for group in &entry.groups {
                if !self.groups.get(group).is_some_and(|m| m.contains(session_id)) {
                    return Err(format!(
                        "session {session_id} lists group {group:?}, which does not list it"
                    ));
                }
            }
        }

        Ok(())
    }

    fn snapshot(&self, group: &str) -> Vec<Member<S>> {
        self.groups
            .get(group)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                self.sessions
                    .get(id)
                    .map(|entry| Member { session_id: *id, sink: entry.sink.clone() })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(members: &[Member<()>]) -> Vec<SessionId> {
        members.iter().map(|m| m.session_id).collect()
    }

    fn registry_with_sessions(count: u64) -> GroupRegistry<()> {
        let mut registry = GroupRegistry::new();
        for id in 1..=count {
            assert!(registry.register_session(id, format!("user{id}"), ()));
        }
        registry
    }

    #[test]
    fn register_duplicate_session_fails() {
        let mut registry = registry_with_sessions(1);
        assert!(!registry.register_session(1, "again".to_string(), ()));
        assert_eq!(registry.session_name(1), Some("user1"));
    }

    #[test]
    fn duplicate_names_are_allowed() {
        let mut registry = GroupRegistry::new();
        assert!(registry.register_session(1, "alice".to_string(), ()));
        assert!(registry.register_session(2, "alice".to_string(), ()));
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn create_twice_reports_exists_and_keeps_members() {
        let mut registry = registry_with_sessions(1);

        assert_eq!(registry.create_group("rust"), CreateOutcome::Created);
        registry.join("rust", 1);
        assert_eq!(registry.create_group("rust"), CreateOutcome::AlreadyExists);

        assert!(registry.is_member("rust", 1));
        assert_eq!(registry.member_names("rust"), Some(vec!["user1".to_string()]));
    }

    #[test]
    fn empty_group_persists() {
        let mut registry = registry_with_sessions(1);
        registry.create_group("rust");

        assert_eq!(registry.lookup("rust"), Some(vec![]));
        registry.join("rust", 1);
        registry.leave("rust", 1);
        assert!(registry.has_group("rust"));
    }

    #[test]
    fn join_reports_existing_members() {
        let mut registry = registry_with_sessions(3);
        registry.create_group("rust");

        assert_eq!(registry.join("rust", 1), JoinOutcome::Joined { others: vec![] });
        let JoinOutcome::Joined { others } = registry.join("rust", 2) else {
            panic!("expected join");
        };
        assert_eq!(ids(&others), vec![1]);
        let JoinOutcome::Joined { others } = registry.join("rust", 3) else {
            panic!("expected join");
        };
        assert_eq!(ids(&others), vec![1, 2]);
    }

    #[test]
    fn join_failures_do_not_mutate() {
        let mut registry = registry_with_sessions(1);

        assert_eq!(registry.join("missing", 1), JoinOutcome::NoSuchGroup);
        assert!(!registry.has_group("missing"));
        assert_eq!(registry.groups_for_session(1).count(), 0);

        registry.create_group("rust");
        registry.join("rust", 1);
        assert_eq!(registry.join("rust", 1), JoinOutcome::AlreadyMember);
        assert_eq!(registry.lookup("rust").map(|m| m.len()), Some(1));

        assert_eq!(registry.join("rust", 99), JoinOutcome::UnknownSession);
        assert!(!registry.is_member("rust", 99));
        registry.check_consistency().unwrap();
    }

    #[test]
    fn leave_updates_both_sides() {
        let mut registry = registry_with_sessions(2);
        registry.create_group("rust");
        registry.join("rust", 1);
        registry.join("rust", 2);

        let LeaveOutcome::Left { remaining } = registry.leave("rust", 1) else {
            panic!("expected leave");
        };
        assert_eq!(ids(&remaining), vec![2]);
        assert!(!registry.is_member("rust", 1));
        assert_eq!(registry.groups_for_session(1).count(), 0);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn leave_failures() {
        let mut registry = registry_with_sessions(1);
        assert_eq!(registry.leave("missing", 1), LeaveOutcome::NoSuchGroup);

        registry.create_group("rust");
        assert_eq!(registry.leave("rust", 1), LeaveOutcome::NotMember);
    }

    #[test]
    fn post_requires_membership() {
        let mut registry = registry_with_sessions(2);
        assert_eq!(registry.members_for_post("rust", 1), PostOutcome::NoSuchGroup);

        registry.create_group("rust");
        registry.join("rust", 2);
        assert_eq!(registry.members_for_post("rust", 1), PostOutcome::NotMember);

        registry.join("rust", 1);
        let PostOutcome::Deliver { members } = registry.members_for_post("rust", 1) else {
            panic!("expected delivery");
        };
        assert_eq!(ids(&members), vec![1, 2]);
    }

    #[test]
    fn delete_group_evicts_members() {
        let mut registry = registry_with_sessions(3);
        registry.create_group("rust");
        registry.create_group("go");
        registry.join("rust", 1);
        registry.join("rust", 2);
        registry.join("go", 1);

        let evicted = registry.delete_group("rust").unwrap();
        assert_eq!(ids(&evicted), vec![1, 2]);
        assert!(!registry.has_group("rust"));
        assert_eq!(registry.groups_for_session(1).collect::<Vec<_>>(), vec!["go"]);
        assert_eq!(registry.groups_for_session(2).count(), 0);
        registry.check_consistency().unwrap();

        assert_eq!(registry.delete_group("rust"), None);
    }

    #[test]
    fn unregister_leaves_groups_intact() {
        let mut registry = registry_with_sessions(2);
        registry.create_group("rust");
        registry.create_group("go");
        registry.join("rust", 1);
        registry.join("rust", 2);
        registry.join("go", 1);

        let departure = registry.unregister_session(1).unwrap();
        assert_eq!(departure.name, "user1");
        let groups: Vec<(&str, Vec<SessionId>)> =
            departure.groups.iter().map(|(g, m)| (g.as_str(), ids(m))).collect();
        assert_eq!(groups, vec![("go", vec![]), ("rust", vec![2])]);

        assert!(registry.has_group("go"));
        assert!(registry.has_group("rust"));
        assert_eq!(registry.session_count(), 1);
        registry.check_consistency().unwrap();

        assert_eq!(registry.unregister_session(1), None);
    }
}
