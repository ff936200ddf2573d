//! Upgradeable proxy shell
//!
//! A registry is deployed in two phases: a minimal bootstrap implementation
//! records the administrator, then `upgrade_to_and_call` swaps in the real
//! logic and runs its one-time initializer. The proxy address is the stable
//! handle; logic state survives later upgrades.

use crate::error::{RegistryError, RegistryResult};
use crate::events::RegistryEvent;
use crate::types::CallContext;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which logic an implementation (or proxy) carries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegistryKind {
    Bootstrap,
    Identity,
    Reputation,
    Validation,
}

/// A deployable logic version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub address: Address,
    pub kind: RegistryKind,
    pub version: String,
}

impl Implementation {
    pub fn new(address: Address, kind: RegistryKind, version: &str) -> Self {
        Self {
            address,
            kind,
            version: version.to_string(),
        }
    }
}

/// Deployment facts visible to an initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentEnv {
    /// Proxy address, the registry's public identity
    pub address: Address,
    pub chain_id: u64,
    pub deadline_window_secs: u64,
}

/// Logic that can sit behind a `RegistryProxy`
pub trait Upgradeable: Sized {
    const KIND: RegistryKind;
    type Init;

    fn initialize(env: &DeploymentEnv, init: Self::Init) -> RegistryResult<Self>;
}

#[derive(Clone)]
pub struct RegistryProxy<T> {
    env: DeploymentEnv,
    owner: Address,
    implementation: Implementation,
    logic: Option<T>,
}

impl<T: Upgradeable> RegistryProxy<T> {
    /// Install the bootstrap implementation; the caller becomes administrator
    pub fn deploy(
        ctx: &mut CallContext,
        env: DeploymentEnv,
        bootstrap: Implementation,
    ) -> RegistryResult<Self> {
        if bootstrap.kind != RegistryKind::Bootstrap {
            return Err(RegistryError::invalid(format!(
                "expected bootstrap implementation, got {}",
                bootstrap.kind
            )));
        }
        if bootstrap.address.is_zero() {
            return Err(RegistryError::invalid("ERC1967InvalidImplementation"));
        }

        ctx.emit(RegistryEvent::Upgraded {
            implementation: bootstrap.address,
        });
        ctx.emit(RegistryEvent::OwnershipTransferred {
            previous_owner: Address::zero(),
            new_owner: ctx.caller,
        });

        log::info!(
            "Deployed {} proxy at {:?} (admin {:?})",
            T::KIND,
            env.address,
            ctx.caller
        );

        Ok(Self {
            env,
            owner: ctx.caller,
            implementation: bootstrap,
            logic: None,
        })
    }

    fn ensure_owner(&self, ctx: &CallContext) -> RegistryResult<()> {
        if ctx.caller != self.owner {
            return Err(RegistryError::unauthorized("OwnableUnauthorizedAccount"));
        }
        Ok(())
    }

    /// Swap the backing implementation, optionally running the initializer
    pub fn upgrade_to_and_call(
        &mut self,
        ctx: &mut CallContext,
        implementation: Implementation,
        init: Option<T::Init>,
    ) -> RegistryResult<()> {
        self.ensure_owner(ctx)?;
        if implementation.address.is_zero() {
            return Err(RegistryError::invalid("ERC1967InvalidImplementation"));
        }
        if implementation.kind != T::KIND {
            return Err(RegistryError::invalid("UUPSUnsupportedProxiableUUID"));
        }

        let logic = match init {
            Some(init) => {
                if self.logic.is_some() {
                    return Err(RegistryError::state("InvalidInitialization"));
                }
                Some(T::initialize(&self.env, init)?)
            }
            None => None,
        };

        ctx.emit(RegistryEvent::Upgraded {
            implementation: implementation.address,
        });
        log::info!(
            "Upgraded {} proxy {:?} to {:?} (v{})",
            T::KIND,
            self.env.address,
            implementation.address,
            implementation.version
        );
        self.implementation = implementation;

        if let Some(logic) = logic {
            self.logic = Some(logic);
            ctx.emit(RegistryEvent::Initialized { version: 1 });
        }
        Ok(())
    }

    /// One-time initialization of an upgraded but uninitialized proxy
    pub fn initialize(&mut self, ctx: &mut CallContext, init: T::Init) -> RegistryResult<()> {
        if self.logic.is_some() {
            return Err(RegistryError::state("InvalidInitialization"));
        }
        self.ensure_owner(ctx)?;
        if self.implementation.kind != T::KIND {
            return Err(RegistryError::state("implementation not installed"));
        }

        self.logic = Some(T::initialize(&self.env, init)?);
        ctx.emit(RegistryEvent::Initialized { version: 1 });
        Ok(())
    }

    pub fn transfer_ownership(
        &mut self,
        ctx: &mut CallContext,
        new_owner: Address,
    ) -> RegistryResult<()> {
        self.ensure_owner(ctx)?;
        if new_owner.is_zero() {
            return Err(RegistryError::invalid("OwnableInvalidOwner"));
        }

        ctx.emit(RegistryEvent::OwnershipTransferred {
            previous_owner: self.owner,
            new_owner,
        });
        self.owner = new_owner;
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.env.address
    }

    pub fn env(&self) -> &DeploymentEnv {
        &self.env
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    pub fn version(&self) -> &str {
        &self.implementation.version
    }

    pub fn is_initialized(&self) -> bool {
        self.logic.is_some()
    }

    pub fn logic(&self) -> RegistryResult<&T> {
        self.logic
            .as_ref()
            .ok_or_else(|| RegistryError::state("not initialized"))
    }

    pub fn logic_mut(&mut self) -> RegistryResult<&mut T> {
        self.logic
            .as_mut()
            .ok_or_else(|| RegistryError::state("not initialized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        start: u64,
    }

    impl Upgradeable for Counter {
        const KIND: RegistryKind = RegistryKind::Reputation;
        type Init = u64;

        fn initialize(_env: &DeploymentEnv, init: u64) -> RegistryResult<Self> {
            if init == 0 {
                return Err(RegistryError::invalid("bad start"));
            }
            Ok(Self { start: init })
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn env() -> DeploymentEnv {
        DeploymentEnv {
            address: addr(0x100),
            chain_id: 31337,
            deadline_window_secs: 300,
        }
    }

    fn deployed(admin: Address) -> RegistryProxy<Counter> {
        let mut ctx = CallContext::new(admin, 1);
        RegistryProxy::deploy(
            &mut ctx,
            env(),
            Implementation::new(addr(0x200), RegistryKind::Bootstrap, "0.0.1"),
        )
        .unwrap()
    }

    fn logic_impl(n: u64) -> Implementation {
        Implementation::new(addr(n), RegistryKind::Reputation, "2.0.0")
    }

    #[test]
    fn test_bootstrap_then_upgrade() {
        let admin = addr(1);
        let mut proxy = deployed(admin);
        assert!(!proxy.is_initialized());
        assert!(proxy.logic().is_err());

        let mut ctx = CallContext::new(admin, 2);
        proxy.upgrade_to_and_call(&mut ctx, logic_impl(0x300), Some(5)).unwrap();

        assert_eq!(proxy.logic().unwrap().start, 5);
        assert_eq!(proxy.version(), "2.0.0");
        assert_eq!(proxy.owner(), admin);
        let names: Vec<_> = ctx.events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Upgraded", "Initialized"]);
    }

    #[test]
    fn test_reinitialization_rejected() {
        let admin = addr(1);
        let mut proxy = deployed(admin);
        let mut ctx = CallContext::new(admin, 2);
        proxy.upgrade_to_and_call(&mut ctx, logic_impl(0x300), Some(5)).unwrap();

        let err = proxy.initialize(&mut CallContext::new(admin, 3), 9).unwrap_err();
        assert_eq!(err, RegistryError::state("InvalidInitialization"));

        let err = proxy
            .upgrade_to_and_call(&mut CallContext::new(admin, 3), logic_impl(0x301), Some(9))
            .unwrap_err();
        assert_eq!(err, RegistryError::state("InvalidInitialization"));
        assert_eq!(proxy.logic().unwrap().start, 5);
        assert_eq!(proxy.implementation().address, addr(0x300));
    }

    #[test]
    fn test_upgrade_preserves_logic_state() {
        let admin = addr(1);
        let mut proxy = deployed(admin);
        proxy
            .upgrade_to_and_call(&mut CallContext::new(admin, 2), logic_impl(0x300), Some(5))
            .unwrap();
        proxy.logic_mut().unwrap().start = 42;

        proxy
            .upgrade_to_and_call(&mut CallContext::new(admin, 3), logic_impl(0x301), None)
            .unwrap();
        assert_eq!(proxy.logic().unwrap().start, 42);
        assert_eq!(proxy.implementation().address, addr(0x301));
    }

    #[test]
    fn test_only_admin_can_upgrade() {
        let mut proxy = deployed(addr(1));
        let err = proxy
            .upgrade_to_and_call(&mut CallContext::new(addr(2), 2), logic_impl(0x300), Some(5))
            .unwrap_err();
        assert_eq!(err, RegistryError::unauthorized("OwnableUnauthorizedAccount"));
        assert!(!proxy.is_initialized());
    }

    #[test]
    fn test_rejects_zero_and_foreign_implementations() {
        let admin = addr(1);
        let mut proxy = deployed(admin);

        let zero = Implementation::new(Address::zero(), RegistryKind::Reputation, "2.0.0");
        assert!(proxy
            .upgrade_to_and_call(&mut CallContext::new(admin, 2), zero, None)
            .is_err());

        let foreign = Implementation::new(addr(0x400), RegistryKind::Identity, "2.0.0");
        let err = proxy
            .upgrade_to_and_call(&mut CallContext::new(admin, 2), foreign, None)
            .unwrap_err();
        assert_eq!(err, RegistryError::invalid("UUPSUnsupportedProxiableUUID"));
    }

    #[test]
    fn test_failed_initializer_leaves_proxy_untouched() {
        let admin = addr(1);
        let mut proxy = deployed(admin);
        let mut ctx = CallContext::new(admin, 2);
        assert!(proxy.upgrade_to_and_call(&mut ctx, logic_impl(0x300), Some(0)).is_err());
        assert_eq!(proxy.implementation().kind, RegistryKind::Bootstrap);
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn test_ownership_transfer_moves_upgrade_rights() {
        let (old, new) = (addr(1), addr(2));
        let mut proxy = deployed(old);
        proxy
            .transfer_ownership(&mut CallContext::new(old, 2), new)
            .unwrap();
        assert_eq!(proxy.owner(), new);

        assert!(proxy
            .upgrade_to_and_call(&mut CallContext::new(old, 3), logic_impl(0x300), None)
            .is_err());
        assert!(proxy
            .upgrade_to_and_call(&mut CallContext::new(new, 3), logic_impl(0x300), None)
            .is_ok());
    }

    #[test]
    fn test_kind_parses_from_string() {
        assert_eq!("identity".parse::<RegistryKind>().unwrap(), RegistryKind::Identity);
        assert_eq!(RegistryKind::Validation.to_string(), "validation");
    }
}
