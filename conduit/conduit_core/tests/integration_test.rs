//! Integration tests for the Conduit core library.
//!
//! These tests drive sessions through a minimal service built on the core
//! traits and check that quota accounting and the phase table hold up when
//! the pieces are used together.

use std::sync::Arc;

use conduit_core::{
    Account, AccountRef, Affinity, CapQuota, Capability, ClientId, IdSpace, Phase, QuotaAccount,
    QuotaTransfer, RamQuota, Resources, Service, SessionArgs, SessionError, SessionHandle,
    SessionState,
};

/// A service that forwards every session to a fake downstream provider
/// and charges the session quota to its own account.
struct ForwardingService {
    account: Arc<QuotaAccount>,
    downstream: IdSpace<conduit_core::id_space::Client, ()>,
    required_ram: RamQuota,
}

impl ForwardingService {
    fn new(required_ram: RamQuota) -> Self {
        Self {
            account: QuotaAccount::shared("forwarder", RamQuota(0), CapQuota(0)),
            downstream: IdSpace::new(),
            required_ram,
        }
    }
}

impl Service for ForwardingService {
    fn name(&self) -> &str {
        "Fwd"
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        match session.phase() {
            Phase::CreateRequested => {
                if session.resources().ram_quota < self.required_ram {
                    session.advance(Phase::InsufficientRamQuota);
                    return Ok(());
                }
                let id = self.downstream.alloc(());
                session.set_downstream(id);
                session.set_handle(SessionHandle::remote(Capability::new("Fwd")));
                session.advance(Phase::Available);
            }
            Phase::UpgradeRequested => {
                session.confirm_upgrade();
                session.advance(Phase::CapHandedOut);
            }
            Phase::CloseRequested => {
                if let Some(id) = session.take_downstream() {
                    self.downstream.remove(id);
                }
                session.take_handle();
                session.advance(Phase::Closed);
            }
            _ => {}
        }
        Ok(())
    }

    fn account(&self) -> AccountRef {
        self.account.account_ref()
    }
}

fn new_session(args: &str) -> SessionState {
    SessionState::new(
        "Fwd",
        SessionArgs::parse(args).unwrap(),
        Affinity::default(),
    )
    .unwrap()
}

fn total(accounts: &[&Arc<QuotaAccount>]) -> (u64, u64) {
    accounts.iter().fold((0, 0), |(ram, caps), a| {
        (ram + a.ram().value(), caps + a.caps().value())
    })
}

#[test]
fn test_full_lifecycle_conserves_quota_and_ids() {
    let env = QuotaAccount::shared("env", RamQuota(64 * 1024), CapQuota(32));
    let mut service = ForwardingService::new(RamQuota(1024));
    let before = total(&[&env, &service.account]);

    let mut session = new_session("ram_quota=8K, cap_quota=4, label=\"app\"");
    let resources = session.resources();

    let ram = QuotaTransfer::new(resources.ram_quota, &env, &service.account()).unwrap();
    let caps = QuotaTransfer::new(resources.cap_quota, &env, &service.account()).unwrap();
    service.initiate_request(&mut session).unwrap();
    assert_eq!(session.phase(), Phase::Available);
    ram.acknowledge();
    caps.acknowledge();
    session.add_donated(resources);
    assert!(session.is_consistent());

    session.advance(Phase::CapHandedOut);
    assert!(session.request_upgrade(RamQuota(2048), CapQuota(1)));
    let delta = Resources::new(session.ram_upgrade(), session.cap_upgrade());
    QuotaTransfer::new(delta.ram_quota, &env, &service.account())
        .unwrap()
        .acknowledge();
    QuotaTransfer::new(delta.cap_quota, &env, &service.account())
        .unwrap()
        .acknowledge();
    service.initiate_request(&mut session).unwrap();
    session.add_donated(delta);
    assert_eq!(session.phase(), Phase::CapHandedOut);

    session.advance(Phase::CloseRequested);
    service.initiate_request(&mut session).unwrap();
    let donated = session.take_donated();
    service
        .account
        .transfer_ram_to(&env.account_ref(), donated.ram_quota)
        .unwrap();
    service
        .account
        .transfer_caps_to(&env.account_ref(), donated.cap_quota)
        .unwrap();

    assert_eq!(session.phase(), Phase::Closed);
    assert!(session.handle().is_none());
    assert!(session.downstream().is_none());
    assert!(service.downstream.is_empty());
    assert_eq!(total(&[&env, &service.account]), before);
    assert_eq!(env.ram(), RamQuota(64 * 1024));
}

#[test]
fn test_failed_create_reverts_donation() {
    let env = QuotaAccount::shared("env", RamQuota(4096), CapQuota(4));
    let mut service = ForwardingService::new(RamQuota(1024));
    let mut session = new_session("ram_quota=512, cap_quota=1");

    {
        let _ram = QuotaTransfer::new(RamQuota(512), &env, &service.account()).unwrap();
        let _caps = QuotaTransfer::new(CapQuota(1), &env, &service.account()).unwrap();
        service.initiate_request(&mut session).unwrap();
        assert_eq!(session.phase(), Phase::InsufficientRamQuota);
    }

    assert!(session.is_consistent());
    assert!(session.handle().is_none());
    assert_eq!(env.ram(), RamQuota(4096));
    assert_eq!(env.caps(), CapQuota(4));
    assert_eq!(service.account.ram(), RamQuota(0));
}

#[test]
fn test_transfer_beyond_balance_fails_atomically() {
    let env = QuotaAccount::shared("env", RamQuota(100), CapQuota(1));
    let child = QuotaAccount::shared("child", RamQuota(0), CapQuota(0));

    assert!(QuotaTransfer::new(RamQuota(101), &env, &child).is_err());
    assert!(QuotaTransfer::new(CapQuota(2), &env, &child).is_err());
    assert_eq!(total(&[&env, &child]), (100, 1));
    assert_eq!(child.ram(), RamQuota(0));
}

#[test]
fn test_concurrent_transfers_conserve_quota() {
    let a = QuotaAccount::shared("a", RamQuota(10_000), CapQuota(0));
    let b = QuotaAccount::shared("b", RamQuota(10_000), CapQuota(0));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let (from, to) = if i % 2 == 0 {
                (Arc::clone(&a), Arc::clone(&b))
            } else {
                (Arc::clone(&b), Arc::clone(&a))
            };
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let _ = from.transfer_ram(&to, RamQuota(7));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(a.ram().value() + b.ram().value(), 20_000);
}

#[test]
fn test_client_ids_are_released() {
    let mut space: IdSpace<conduit_core::id_space::Client, u32> = IdSpace::new();
    let ids: Vec<ClientId> = (0..8).map(|i| space.alloc(i)).collect();
    for id in &ids {
        space.remove(*id);
    }
    assert!(space.is_empty());
}
