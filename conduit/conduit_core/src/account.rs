//! Quota accounts and quota transfers.
//!
//! A [`QuotaAccount`] holds a RAM and a capability balance. Quota only
//! moves between accounts through [`QuotaAccount::transfer_ram`] and
//! [`QuotaAccount::transfer_caps`]. A transfer either moves the whole
//! amount or nothing, and never drives a balance below zero, so the sum
//! of the participating balances is the same before and after.
//!
//! Providers expose the account sessions are paid into through the
//! [`Account`] trait. Providers without an account of their own hand out an
//! invalid [`AccountRef`]; transfers to an invalid reference are no-ops.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::QuotaError;
use crate::id::AccountId;
use crate::types::quota::{CapQuota, RamQuota, Resources};

/// Current balance of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    /// RAM balance in bytes
    pub ram: u64,

    /// Capability balance
    pub caps: u64,
}

/// An account holding RAM and capability quota.
pub struct QuotaAccount {
    id: AccountId,
    name: String,
    balance: Mutex<Balance>,
}

impl QuotaAccount {
    /// Create an account with an initial balance.
    pub fn new(name: impl Into<String>, ram: RamQuota, caps: CapQuota) -> Self {
        Self {
            id: AccountId::new(),
            name: name.into(),
            balance: Mutex::new(Balance {
                ram: ram.value(),
                caps: caps.value(),
            }),
        }
    }

    /// Create a shared account with an initial balance.
    pub fn shared(name: impl Into<String>, ram: RamQuota, caps: CapQuota) -> Arc<Self> {
        Arc::new(Self::new(name, ram, caps))
    }

    /// The account's unique id.
    pub fn id(&self) -> AccountId {
        self.id
    }

    /// The account's name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of the current balance.
    pub fn balance(&self) -> Balance {
        *self.balance.lock()
    }

    /// Available RAM quota.
    pub fn ram(&self) -> RamQuota {
        RamQuota(self.balance.lock().ram)
    }

    /// Available capability quota.
    pub fn caps(&self) -> CapQuota {
        CapQuota(self.balance.lock().caps)
    }

    /// Check whether the account could pay for `resources` right now.
    pub fn covers(&self, resources: Resources) -> bool {
        let balance = self.balance.lock();
        balance.ram >= resources.ram_quota.value() && balance.caps >= resources.cap_quota.value()
    }

    /// Move RAM quota from this account to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::InsufficientRam`] if the balance is below
    /// `amount`. Neither account is modified in that case.
    pub fn transfer_ram(&self, to: &QuotaAccount, amount: RamQuota) -> Result<(), QuotaError> {
        self.transfer_with(to, amount.value(), |b| &mut b.ram, |requested, available| {
            QuotaError::InsufficientRam {
                requested,
                available,
            }
        })
    }

    /// Move capability quota from this account to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::InsufficientCaps`] if the balance is below
    /// `amount`. Neither account is modified in that case.
    pub fn transfer_caps(&self, to: &QuotaAccount, amount: CapQuota) -> Result<(), QuotaError> {
        self.transfer_with(to, amount.value(), |b| &mut b.caps, |requested, available| {
            QuotaError::InsufficientCaps {
                requested,
                available,
            }
        })
    }

    fn transfer_with(
        &self,
        to: &QuotaAccount,
        amount: u64,
        field: impl Fn(&mut Balance) -> &mut u64,
        insufficient: impl FnOnce(u64, u64) -> QuotaError,
    ) -> Result<(), QuotaError> {
        if self.id == to.id {
            let mut balance = self.balance.lock();
            let available = *field(&mut *balance);
            if available < amount {
                return Err(insufficient(amount, available));
            }
            return Ok(());
        }

        // Both balances are locked in id order so that two opposing
        // transfers cannot deadlock.
        let (mut src, mut dst) = if self.id < to.id {
            let src = self.balance.lock();
            let dst = to.balance.lock();
            (src, dst)
        } else {
            let dst = to.balance.lock();
            let src = self.balance.lock();
            (src, dst)
        };

        let available = *field(&mut *src);
        if available < amount {
            return Err(insufficient(amount, available));
        }

        let credited = field(&mut *dst).checked_add(amount).ok_or_else(|| {
            warn!(account = %to.name, "quota balance would overflow");
            insufficient(amount, available)
        })?;

        *field(&mut *src) = available - amount;
        *field(&mut *dst) = credited;

        debug!(from = %self.name, to = %to.name, amount, "quota transferred");
        Ok(())
    }
}

impl fmt::Debug for QuotaAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaAccount")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("balance", &self.balance())
            .finish()
    }
}

/// A possibly invalid reference to a quota account.
#[derive(Clone, Debug, Default)]
pub struct AccountRef(Option<Arc<QuotaAccount>>);

impl AccountRef {
    /// A reference that names no account.
    pub fn invalid() -> Self {
        Self(None)
    }

    /// Check whether the reference names an account.
    pub fn valid(&self) -> bool {
        self.0.is_some()
    }

    /// The referenced account, if any.
    pub fn get(&self) -> Option<&Arc<QuotaAccount>> {
        self.0.as_ref()
    }
}

impl From<Arc<QuotaAccount>> for AccountRef {
    fn from(account: Arc<QuotaAccount>) -> Self {
        Self(Some(account))
    }
}

impl From<&Arc<QuotaAccount>> for AccountRef {
    fn from(account: &Arc<QuotaAccount>) -> Self {
        Self(Some(Arc::clone(account)))
    }
}

/// Something quota can be transferred out of.
pub trait Account {
    /// Move RAM quota to the account referenced by `to`.
    ///
    /// Transfers to an invalid reference do nothing.
    fn transfer_ram_to(&self, to: &AccountRef, amount: RamQuota) -> Result<(), QuotaError>;

    /// Move capability quota to the account referenced by `to`.
    ///
    /// Transfers to an invalid reference do nothing.
    fn transfer_caps_to(&self, to: &AccountRef, amount: CapQuota) -> Result<(), QuotaError>;

    /// Reference to the account quota is paid into.
    fn account_ref(&self) -> AccountRef;
}

impl Account for AccountRef {
    fn transfer_ram_to(&self, to: &AccountRef, amount: RamQuota) -> Result<(), QuotaError> {
        match (self.get(), to.get()) {
            (Some(from), Some(to)) => from.transfer_ram(to, amount),
            _ => Ok(()),
        }
    }

    fn transfer_caps_to(&self, to: &AccountRef, amount: CapQuota) -> Result<(), QuotaError> {
        match (self.get(), to.get()) {
            (Some(from), Some(to)) => from.transfer_caps(to, amount),
            _ => Ok(()),
        }
    }

    fn account_ref(&self) -> AccountRef {
        self.clone()
    }
}

impl Account for Arc<QuotaAccount> {
    fn transfer_ram_to(&self, to: &AccountRef, amount: RamQuota) -> Result<(), QuotaError> {
        match to.get() {
            Some(to) => QuotaAccount::transfer_ram(self, to, amount),
            None => Ok(()),
        }
    }

    fn transfer_caps_to(&self, to: &AccountRef, amount: CapQuota) -> Result<(), QuotaError> {
        match to.get() {
            Some(to) => QuotaAccount::transfer_caps(self, to, amount),
            None => Ok(()),
        }
    }

    fn account_ref(&self) -> AccountRef {
        AccountRef::from(self)
    }
}

/// A kind of quota that can be moved between accounts.
pub trait Quota: Copy + fmt::Debug {
    /// Move `amount` from `from` to `to`.
    fn transfer(from: &AccountRef, to: &AccountRef, amount: Self) -> Result<(), QuotaError>;
}

impl Quota for RamQuota {
    fn transfer(from: &AccountRef, to: &AccountRef, amount: Self) -> Result<(), QuotaError> {
        from.transfer_ram_to(to, amount)
    }
}

impl Quota for CapQuota {
    fn transfer(from: &AccountRef, to: &AccountRef, amount: Self) -> Result<(), QuotaError> {
        from.transfer_caps_to(to, amount)
    }
}

/// Guard for a quota transfer that is undone unless acknowledged.
///
/// The transfer happens when the guard is created. If the operation the
/// quota was moved for fails before [`QuotaTransfer::acknowledge`] is
/// called, dropping the guard moves the quota back.
#[must_use = "the transfer is reverted when the guard is dropped"]
pub struct QuotaTransfer<Q: Quota> {
    amount: Q,
    from: AccountRef,
    to: AccountRef,
    acknowledged: bool,
}

impl<Q: Quota> QuotaTransfer<Q> {
    /// Move `amount` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Fails without side effects if `from` cannot pay `amount`.
    pub fn new(amount: Q, from: &dyn Account, to: &dyn Account) -> Result<Self, QuotaError> {
        let from = from.account_ref();
        let to = to.account_ref();
        Q::transfer(&from, &to, amount)?;
        Ok(Self {
            amount,
            from,
            to,
            acknowledged: false,
        })
    }

    /// Keep the transfer.
    pub fn acknowledge(mut self) {
        self.acknowledged = true;
    }
}

impl<Q: Quota> Drop for QuotaTransfer<Q> {
    fn drop(&mut self) {
        if self.acknowledged {
            return;
        }
        if let Err(err) = Q::transfer(&self.to, &self.from, self.amount) {
            warn!(amount = ?self.amount, %err, "failed to revert quota transfer");
        }
    }
}
