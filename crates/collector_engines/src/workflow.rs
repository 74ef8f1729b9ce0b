#![forbid(unsafe_code)]

use std::fmt;

use collector_kernel_contracts::session::{
    AuthTag, LeaseId, RpcMethod, SessionRecord, TransportAuth, TtlSeconds,
};
use collector_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use thiserror::Error;

pub mod reason_codes {
    use collector_kernel_contracts::ReasonCodeId;

    pub const SESSION_OK_ADVANCE: ReasonCodeId = ReasonCodeId(0x5353_0001);
    pub const SESSION_OK_TERMINAL: ReasonCodeId = ReasonCodeId(0x5353_0002);

    pub const SESSION_METHOD_NOT_IN_WORKFLOW: ReasonCodeId = ReasonCodeId(0x5353_0010);
    pub const SESSION_INVALID_CALLER_OR_AUTH: ReasonCodeId = ReasonCodeId(0x5353_0011);
    pub const SESSION_EMPTY_FOR_NON_ID_CARD: ReasonCodeId = ReasonCodeId(0x5353_0012);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    Auth,
    Choice,
    Vote,
    Verify,
}

/// Per-deployment expiry for each stage of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTtlConfig {
    pub auth: TtlSeconds,
    pub choice: TtlSeconds,
    pub vote: TtlSeconds,
    pub verify: TtlSeconds,
}

impl SessionTtlConfig {
    pub const DEFAULT_AUTH: TtlSeconds = TtlSeconds::from_const(300);
    pub const DEFAULT_CHOICE: TtlSeconds = TtlSeconds::from_const(900);
    pub const DEFAULT_VOTE: TtlSeconds = TtlSeconds::from_const(900);
    pub const DEFAULT_VERIFY: TtlSeconds = TtlSeconds::from_const(1_800);

    pub fn mvp_v1() -> Self {
        Self {
            auth: Self::DEFAULT_AUTH,
            choice: Self::DEFAULT_CHOICE,
            vote: Self::DEFAULT_VOTE,
            verify: Self::DEFAULT_VERIFY,
        }
    }

    pub fn v1(
        auth_secs: u32,
        choice_secs: u32,
        vote_secs: u32,
        verify_secs: u32,
    ) -> Result<Self, ContractViolation> {
        Ok(Self {
            auth: TtlSeconds::new(auth_secs)?,
            choice: TtlSeconds::new(choice_secs)?,
            vote: TtlSeconds::new(vote_secs)?,
            verify: TtlSeconds::new(verify_secs)?,
        })
    }

    pub fn ttl_for(&self, class: TtlClass) -> TtlSeconds {
        match class {
            TtlClass::Auth => self.auth,
            TtlClass::Choice => self.choice,
            TtlClass::Vote => self.vote,
            TtlClass::Verify => self.verify,
        }
    }
}

impl Validate for SessionTtlConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.auth.validate()?;
        self.choice.validate()?;
        self.vote.validate()?;
        self.verify.validate()
    }
}

/// What an accepted `Vote` does to the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteCompletion {
    /// Remove the record; the session id cannot be reused.
    #[default]
    Delete,
    /// Keep `(Vote, auth)` alive for the verification service.
    HandoffToVerification,
}

impl VoteCompletion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "delete" => Some(VoteCompletion::Delete),
            "handoff" => Some(VoteCompletion::HandoffToVerification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    MobileIdFlow(AuthTag),
    ChoiceSelection,
    WebEid,
    VoteCasting,
    Verification,
}

impl WorkflowKind {
    pub fn name(self) -> &'static str {
        match self {
            WorkflowKind::MobileIdFlow(AuthTag::SmartId) => "smartid",
            WorkflowKind::MobileIdFlow(_) => "mobileid",
            WorkflowKind::ChoiceSelection => "choices",
            WorkflowKind::WebEid => "webeid",
            WorkflowKind::VoteCasting => "voting",
            WorkflowKind::Verification => "verification",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMatch {
    Empty,
    Exactly(AuthTag),
    AnyResolved,
}

impl AuthMatch {
    fn matches(self, auth: AuthTag) -> bool {
        match self {
            AuthMatch::Empty => !auth.is_resolved(),
            AuthMatch::Exactly(tag) => auth == tag,
            AuthMatch::AnyResolved => auth.is_resolved(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAssign {
    Keep,
    Set(AuthTag),
}

/// One accepted prior state for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRow {
    pub prior_caller: Option<RpcMethod>,
    pub prior_auth: AuthMatch,
    pub assign: AuthAssign,
    /// Row only applies to connections authenticated this way.
    pub transport: Option<TransportAuth>,
}

impl TransitionRow {
    pub fn from_empty(assign: AuthTag) -> Self {
        Self {
            prior_caller: None,
            prior_auth: AuthMatch::Empty,
            assign: AuthAssign::Set(assign),
            transport: None,
        }
    }

    pub fn after(prior: RpcMethod, auth: AuthMatch) -> Self {
        Self {
            prior_caller: Some(prior),
            prior_auth: auth,
            assign: AuthAssign::Keep,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: TransportAuth) -> Self {
        self.transport = Some(transport);
        self
    }

    fn matches_record(&self, record: &SessionRecord) -> bool {
        self.prior_caller == record.caller && self.prior_auth.matches(record.auth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceAction {
    Update { ttl: TtlClass, fresh_lease: bool },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub method: RpcMethod,
    pub rows: Vec<TransitionRow>,
    pub action: AdvanceAction,
}

impl TransitionRule {
    fn new(method: RpcMethod, rows: Vec<TransitionRow>, action: AdvanceAction) -> Self {
        Self {
            method,
            rows,
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Update { ttl: TtlClass },
    Delete,
}

/// Result of an accepted predicate: what the verifier must persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub method: RpcMethod,
    pub auth: AuthTag,
    /// Lease to send with the update; `LeaseId::NONE` asks for a fresh one.
    pub lease: LeaseId,
    pub advance: Advance,
}

impl Transition {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self.advance {
            Advance::Update { .. } => reason_codes::SESSION_OK_ADVANCE,
            Advance::Delete => reason_codes::SESSION_OK_TERMINAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    #[error("method {method} is not served by workflow {workflow}")]
    MethodNotInWorkflow {
        workflow: WorkflowKind,
        method: RpcMethod,
    },
    #[error("invalid caller/auth for session: method {method}, caller {}, auth {auth}", caller_label(.caller))]
    InvalidCallerOrAuth {
        method: RpcMethod,
        caller: Option<RpcMethod>,
        auth: AuthTag,
    },
    #[error("empty session for non-ID-card connection: method {method}, transport {transport}")]
    EmptySessionForNonIdCard {
        method: RpcMethod,
        transport: TransportAuth,
    },
}

impl TransitionRejection {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            TransitionRejection::MethodNotInWorkflow { .. } => {
                reason_codes::SESSION_METHOD_NOT_IN_WORKFLOW
            }
            TransitionRejection::InvalidCallerOrAuth { .. } => {
                reason_codes::SESSION_INVALID_CALLER_OR_AUTH
            }
            TransitionRejection::EmptySessionForNonIdCard { .. } => {
                reason_codes::SESSION_EMPTY_FOR_NON_ID_CARD
            }
        }
    }
}

fn caller_label(caller: &Option<RpcMethod>) -> &'static str {
    caller.map(RpcMethod::as_str).unwrap_or("<none>")
}

/// Declarative transition table for one front-end service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTable {
    kind: WorkflowKind,
    rules: Vec<TransitionRule>,
}

impl WorkflowTable {
    /// Mobile-ID or Smart-ID authentication plus the signing steps, bound to
    /// exactly one auth tag.
    pub fn mobile_id_flow(tag: AuthTag) -> Result<Self, ContractViolation> {
        if !matches!(tag, AuthTag::MobileId | AuthTag::SmartId) {
            return Err(ContractViolation::InvalidValue {
                field: "workflow_table.mobile_id_flow.tag",
                reason: "must be mid or sid",
            });
        }
        let t = AuthMatch::Exactly(tag);
        let auth = AdvanceAction::Update {
            ttl: TtlClass::Auth,
            fresh_lease: false,
        };
        let vote = AdvanceAction::Update {
            ttl: TtlClass::Vote,
            fresh_lease: false,
        };
        Ok(Self {
            kind: WorkflowKind::MobileIdFlow(tag),
            rules: vec![
                TransitionRule::new(
                    RpcMethod::Authenticate,
                    vec![TransitionRow::from_empty(tag)],
                    auth,
                ),
                TransitionRule::new(
                    RpcMethod::AuthenticateStatus,
                    vec![
                        TransitionRow::after(RpcMethod::Authenticate, t),
                        TransitionRow::after(RpcMethod::AuthenticateStatus, t),
                    ],
                    auth,
                ),
                TransitionRule::new(
                    RpcMethod::GetCertificate,
                    vec![TransitionRow::after(RpcMethod::VoterChoices, t)],
                    AdvanceAction::Update {
                        ttl: TtlClass::Vote,
                        fresh_lease: true,
                    },
                ),
                TransitionRule::new(
                    RpcMethod::GetCertificateStatus,
                    vec![
                        TransitionRow::after(RpcMethod::GetCertificate, t),
                        TransitionRow::after(RpcMethod::GetCertificateStatus, t),
                    ],
                    vote,
                ),
                TransitionRule::new(
                    RpcMethod::Sign,
                    vec![TransitionRow::after(RpcMethod::GetCertificateStatus, t)],
                    vote,
                ),
                TransitionRule::new(
                    RpcMethod::SignStatus,
                    vec![
                        TransitionRow::after(RpcMethod::Sign, t),
                        TransitionRow::after(RpcMethod::SignStatus, t),
                    ],
                    vote,
                ),
            ],
        })
    }

    pub fn choice_selection() -> Self {
        Self {
            kind: WorkflowKind::ChoiceSelection,
            rules: vec![TransitionRule::new(
                RpcMethod::VoterChoices,
                vec![
                    TransitionRow::from_empty(AuthTag::IdCard).with_transport(TransportAuth::Tls),
                    TransitionRow::after(
                        RpcMethod::AuthenticateStatus,
                        AuthMatch::Exactly(AuthTag::MobileId),
                    ),
                    TransitionRow::after(
                        RpcMethod::AuthenticateStatus,
                        AuthMatch::Exactly(AuthTag::SmartId),
                    ),
                    TransitionRow::after(RpcMethod::Token, AuthMatch::Exactly(AuthTag::WebEid)),
                ],
                AdvanceAction::Update {
                    ttl: TtlClass::Choice,
                    fresh_lease: true,
                },
            )],
        }
    }

    pub fn web_eid() -> Self {
        let auth = AdvanceAction::Update {
            ttl: TtlClass::Auth,
            fresh_lease: false,
        };
        Self {
            kind: WorkflowKind::WebEid,
            rules: vec![
                TransitionRule::new(
                    RpcMethod::Challenge,
                    vec![TransitionRow::from_empty(AuthTag::WebEid)],
                    auth,
                ),
                TransitionRule::new(
                    RpcMethod::Token,
                    vec![TransitionRow::after(
                        RpcMethod::Challenge,
                        AuthMatch::Exactly(AuthTag::WebEid),
                    )],
                    auth,
                ),
            ],
        }
    }

    pub fn vote_casting(completion: VoteCompletion) -> Self {
        let action = match completion {
            VoteCompletion::Delete => AdvanceAction::Delete,
            VoteCompletion::HandoffToVerification => AdvanceAction::Update {
                ttl: TtlClass::Verify,
                fresh_lease: true,
            },
        };
        Self {
            kind: WorkflowKind::VoteCasting,
            rules: vec![TransitionRule::new(
                RpcMethod::Vote,
                vec![
                    TransitionRow::after(
                        RpcMethod::VoterChoices,
                        AuthMatch::Exactly(AuthTag::IdCard),
                    ),
                    TransitionRow::after(
                        RpcMethod::VoterChoices,
                        AuthMatch::Exactly(AuthTag::WebEid),
                    ),
                    TransitionRow::after(
                        RpcMethod::SignStatus,
                        AuthMatch::Exactly(AuthTag::MobileId),
                    ),
                    TransitionRow::after(
                        RpcMethod::SignStatus,
                        AuthMatch::Exactly(AuthTag::SmartId),
                    ),
                ],
                action,
            )],
        }
    }

    pub fn verification() -> Self {
        Self {
            kind: WorkflowKind::Verification,
            rules: vec![TransitionRule::new(
                RpcMethod::Verify,
                vec![
                    TransitionRow::after(RpcMethod::Vote, AuthMatch::AnyResolved),
                    TransitionRow::after(RpcMethod::Verify, AuthMatch::AnyResolved),
                ],
                AdvanceAction::Update {
                    ttl: TtlClass::Verify,
                    fresh_lease: false,
                },
            )],
        }
    }

    /// Table for `kind`. `completion` only matters for vote casting.
    pub fn for_kind(
        kind: WorkflowKind,
        completion: VoteCompletion,
    ) -> Result<Self, ContractViolation> {
        Ok(match kind {
            WorkflowKind::MobileIdFlow(tag) => Self::mobile_id_flow(tag)?,
            WorkflowKind::ChoiceSelection => Self::choice_selection(),
            WorkflowKind::WebEid => Self::web_eid(),
            WorkflowKind::VoteCasting => Self::vote_casting(completion),
            WorkflowKind::Verification => Self::verification(),
        })
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn rule(&self, method: RpcMethod) -> Option<&TransitionRule> {
        self.rules.iter().find(|r| r.method == method)
    }

    pub fn serves(&self, method: RpcMethod) -> bool {
        self.rule(method).is_some()
    }

    /// Pure predicate step: decides whether `method` may run on top of
    /// `record` and what the record becomes if it does.
    pub fn evaluate(
        &self,
        method: RpcMethod,
        record: &SessionRecord,
        transport: TransportAuth,
    ) -> Result<Transition, TransitionRejection> {
        let rule = self
            .rule(method)
            .ok_or(TransitionRejection::MethodNotInWorkflow {
                workflow: self.kind,
                method,
            })?;

        let mut transport_refused = false;
        for row in &rule.rows {
            if !row.matches_record(record) {
                continue;
            }
            if row.transport.is_some_and(|required| required != transport) {
                transport_refused = true;
                continue;
            }
            let auth = match row.assign {
                AuthAssign::Keep => record.auth,
                AuthAssign::Set(tag) => tag,
            };
            let (lease, advance) = match rule.action {
                AdvanceAction::Update { ttl, fresh_lease } => {
                    let lease = if fresh_lease {
                        LeaseId::NONE
                    } else {
                        record.lease
                    };
                    (lease, Advance::Update { ttl })
                }
                AdvanceAction::Delete => (record.lease, Advance::Delete),
            };
            return Ok(Transition {
                method,
                auth,
                lease,
                advance,
            });
        }

        if transport_refused && record.is_empty() {
            return Err(TransitionRejection::EmptySessionForNonIdCard { method, transport });
        }
        Err(TransitionRejection::InvalidCallerOrAuth {
            method,
            caller: record.caller,
            auth: record.auth,
        })
    }
}
