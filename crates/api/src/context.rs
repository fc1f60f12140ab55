use splitledger_core::MemberId;

/// Identity of the member making the request.
///
/// Session verification happens upstream; this only carries the verified id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberContext {
    member_id: MemberId,
}

impl MemberContext {
    pub fn new(member_id: MemberId) -> Self {
        Self { member_id }
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }
}
