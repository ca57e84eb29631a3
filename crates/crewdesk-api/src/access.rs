use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crewdesk_db::Database;
use crewdesk_db::models::AccessRow;
use crewdesk_gateway::RoomGate;
use crewdesk_types::models::{GlobalRole, RoomId, RoomKind, WorkspaceId, WorkspaceRole};

/// Outcome of a membership check. Never an error by itself; callers decide
/// how a denial surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccess {
    Granted { workspace_role: Option<WorkspaceRole> },
    Denied,
    Missing,
}

/// What the authority knows about one (user, room) pair.
#[derive(Debug, Clone)]
pub struct RoomFacts {
    pub room_id: RoomId,
    pub workspace_id: Option<WorkspaceId>,
    pub created_by: Uuid,
    pub kind: RoomKind,
    pub archived: bool,
    pub is_member: bool,
    pub workspace_role: Option<WorkspaceRole>,
}

impl RoomFacts {
    fn from_row(row: AccessRow) -> anyhow::Result<Self> {
        Ok(Self {
            room_id: row.room_id,
            workspace_id: row.workspace_id,
            created_by: Uuid::parse_str(&row.created_by)?,
            kind: RoomKind::from_str(&row.kind)?,
            archived: row.archived,
            is_member: row.is_member,
            workspace_role: row.workspace_role.as_deref().map(WorkspaceRole::from_str).transpose()?,
        })
    }

    /// Read/write access comes from a membership row only. A workspace role
    /// never stands in for it.
    pub fn access(&self) -> RoomAccess {
        if self.is_member {
            RoomAccess::Granted { workspace_role: self.workspace_role }
        } else {
            RoomAccess::Denied
        }
    }

    pub fn manageable_by(&self, user_id: Uuid, role: GlobalRole) -> bool {
        if self.created_by == user_id {
            return true;
        }
        match self.workspace_id {
            Some(_) => self.workspace_role.is_some_and(|r| r.can_manage_rooms()),
            None => role == GlobalRole::Admin,
        }
    }
}

/// Room membership authority backed by the chat database.
#[derive(Clone)]
pub struct MembershipAuthority {
    db: Arc<Database>,
}

impl MembershipAuthority {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// `None` when the room does not exist.
    pub fn lookup(&self, user_id: Uuid, room_id: RoomId) -> anyhow::Result<Option<RoomFacts>> {
        self.db
            .get_access(room_id, &user_id.to_string())?
            .map(RoomFacts::from_row)
            .transpose()
    }

    pub fn can_access_room(&self, user_id: Uuid, room_id: RoomId) -> anyhow::Result<RoomAccess> {
        Ok(match self.lookup(user_id, room_id)? {
            Some(facts) => facts.access(),
            None => RoomAccess::Missing,
        })
    }

    pub fn can_manage_room(
        &self,
        user_id: Uuid,
        room_id: RoomId,
        role: GlobalRole,
    ) -> anyhow::Result<bool> {
        Ok(self
            .lookup(user_id, room_id)?
            .is_some_and(|facts| facts.manageable_by(user_id, role)))
    }
}

#[async_trait]
impl RoomGate for MembershipAuthority {
    async fn may_join(&self, user_id: Uuid, room_id: RoomId) -> bool {
        let authority = self.clone();
        let verdict =
            tokio::task::spawn_blocking(move || authority.lookup(user_id, room_id)).await;

        // Archived rooms take no new subscribers.
        match verdict {
            Ok(Ok(Some(facts))) => {
                !facts.archived && matches!(facts.access(), RoomAccess::Granted { .. })
            }
            Ok(Ok(None)) => false,
            Ok(Err(e)) => {
                warn!("membership check for room {} failed: {:#}", room_id, e);
                false
            }
            Err(e) => {
                warn!("membership check for room {} panicked: {}", room_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_db::models::NewRoom;

    struct Fixture {
        authority: MembershipAuthority,
        db: Arc<Database>,
        creator: Uuid,
        member: Uuid,
        outsider: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Fixture {
            authority: MembershipAuthority::new(db.clone()),
            db,
            creator: Uuid::new_v4(),
            member: Uuid::new_v4(),
            outsider: Uuid::new_v4(),
        }
    }

    fn room(f: &Fixture, workspace_id: Option<i64>) -> RoomId {
        let members = [f.member.to_string()];
        f.db.create_room(&NewRoom {
            workspace_id,
            name: "ops",
            description: None,
            kind: RoomKind::Group,
            created_by: &f.creator.to_string(),
            member_ids: &members,
        })
        .unwrap()
    }

    #[test]
    fn membership_row_grants_access() {
        let f = fixture();
        let room_id = room(&f, Some(1));
        f.db.set_workspace_role(1, &f.member.to_string(), "member").unwrap();

        assert_eq!(
            f.authority.can_access_room(f.member, room_id).unwrap(),
            RoomAccess::Granted { workspace_role: Some(WorkspaceRole::Member) }
        );
        assert_eq!(
            f.authority.can_access_room(f.creator, room_id).unwrap(),
            RoomAccess::Granted { workspace_role: None }
        );
        assert_eq!(f.authority.can_access_room(f.outsider, room_id).unwrap(), RoomAccess::Denied);
        assert_eq!(f.authority.can_access_room(f.member, 999).unwrap(), RoomAccess::Missing);
    }

    #[test]
    fn workspace_manager_manages_but_cannot_read() {
        let f = fixture();
        let room_id = room(&f, Some(1));
        f.db.set_workspace_role(1, &f.outsider.to_string(), "manager").unwrap();

        assert!(f.authority.can_manage_room(f.outsider, room_id, GlobalRole::Member).unwrap());
        assert_eq!(f.authority.can_access_room(f.outsider, room_id).unwrap(), RoomAccess::Denied);
    }

    #[test]
    fn creator_manages_and_plain_member_does_not() {
        let f = fixture();
        let room_id = room(&f, Some(1));
        f.db.set_workspace_role(1, &f.member.to_string(), "member").unwrap();

        assert!(f.authority.can_manage_room(f.creator, room_id, GlobalRole::Member).unwrap());
        assert!(!f.authority.can_manage_room(f.member, room_id, GlobalRole::Member).unwrap());
    }

    #[test]
    fn global_rooms_defer_to_the_global_role() {
        let f = fixture();
        let room_id = room(&f, None);

        assert!(f.authority.can_manage_room(f.outsider, room_id, GlobalRole::Admin).unwrap());
        assert!(!f.authority.can_manage_room(f.member, room_id, GlobalRole::Member).unwrap());
        // Admin still has to join before reading.
        assert_eq!(f.authority.can_access_room(f.outsider, room_id).unwrap(), RoomAccess::Denied);
    }

    #[test]
    fn missing_room_is_never_manageable() {
        let f = fixture();
        assert!(!f.authority.can_manage_room(f.creator, 42, GlobalRole::Admin).unwrap());
    }

    #[tokio::test]
    async fn gate_admits_members_only() {
        let f = fixture();
        let room_id = room(&f, None);

        assert!(f.authority.may_join(f.member, room_id).await);
        assert!(!f.authority.may_join(f.outsider, room_id).await);
        assert!(!f.authority.may_join(f.member, room_id + 1).await);
    }

    #[tokio::test]
    async fn gate_refuses_archived_rooms() {
        let f = fixture();
        let room_id = room(&f, None);
        assert!(f.db.archive_room(room_id).unwrap());

        assert!(!f.authority.may_join(f.member, room_id).await);
        assert!(!f.authority.may_join(f.creator, room_id).await);
    }
}
