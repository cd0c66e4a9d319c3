// crates/uniperp-core/src/token.rs
//
// Fungible-token collaborator.
//
// Balances move only through the primitives defined here: `transfer`,
// `transfer_from` (allowance-gated pull), `mint` and `burn`. `Balances` is the
// bare table, shared by plain tokens and by stake-ledger share tokens.
// `BaseToken` adds minters, handlers and a private-transfer switch on top.
// All accounting uses integer base units with 18 decimals.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::access::{Governable, HandlerSet};
use crate::address::Address;
use crate::error::ProtocolError;
use crate::math;

/// Token amount in base units.
pub type Amount = u128;

/// Decimals used by every token in the engine.
pub const TOKEN_DECIMALS: u32 = 18;

/// One whole token in base units (10^18).
pub const UNIT: Amount = 1_000_000_000_000_000_000;

/// Scale a whole-token amount to base units: `expand_decimals(5, 18) == 5 * 10^18`.
pub fn expand_decimals(amount: u128, decimals: u32) -> Amount {
    amount * 10u128.pow(decimals)
}

/// Display wrapper rendering base units as a decimal token amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Units(pub Amount);

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            // Up to 18 decimal places, trailing zeros trimmed
            let frac_str = format!("{:018}", frac);
            let trimmed = frac_str.trim_end_matches('0');
            write!(f, "{}.{}", whole, trimmed)
        }
    }
}

impl FromStr for Units {
    type Err = ProtocolError;

    /// Parse a decimal token amount such as `"1000"` or `"0.0206"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAmount(format!("cannot parse token amount {:?}", s));
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > TOKEN_DECIMALS as usize
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<18}", frac);
            padded.parse().map_err(|_| invalid())?
        };
        let base = math::mul(whole, UNIT)?;
        Ok(Units(math::add(base, frac_units)?))
    }
}

/// Read/transfer interface every token-like component exposes.
///
/// Plain tokens and stake-ledger share tokens both implement it, which lets a
/// ledger accept another ledger's shares as a deposit token.
pub trait FungibleToken {
    fn balance_of(&self, account: &Address) -> Amount;

    fn total_supply(&self) -> Amount;

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    fn approve(&mut self, owner: Address, spender: Address, amount: Amount)
        -> Result<(), ProtocolError>;

    /// Move `amount` from `sender` (the caller) to `recipient`.
    fn transfer(
        &mut self,
        sender: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError>;

    /// Pull `amount` from `from` on behalf of `spender`.
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError>;
}

/// Balance, allowance and supply table of a single token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
    total_supply: Amount,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: Amount) {
        if amount == 0 {
            self.allowances.remove(&(owner, spender));
        } else {
            self.allowances.insert((owner, spender), amount);
        }
    }

    /// Decrease `spender`'s allowance over `owner`'s balance.
    pub fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        amount: Amount,
        symbol: &str,
    ) -> Result<(), ProtocolError> {
        let current = self.allowance(&owner, &spender);
        if current < amount {
            return Err(ProtocolError::InsufficientAllowance(format!(
                "{}: transfer amount {} exceeds allowance {}",
                symbol, amount, current
            )));
        }
        self.approve(owner, spender, current - amount);
        Ok(())
    }

    pub fn mint(&mut self, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.total_supply = math::add(self.total_supply, amount)?;
        let balance = self.balance_of(&account);
        self.balances.insert(account, balance + amount);
        Ok(())
    }

    pub fn burn(&mut self, account: Address, amount: Amount, symbol: &str) -> Result<(), ProtocolError> {
        let balance = self.balance_of(&account);
        if balance < amount {
            return Err(ProtocolError::InsufficientBalance(format!(
                "{}: burn amount {} exceeds balance {}",
                symbol, amount, balance
            )));
        }
        self.set_balance(account, balance - amount);
        self.total_supply -= amount;
        Ok(())
    }

    /// Move a balance without any permission checks.
    pub fn move_balance(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
        symbol: &str,
    ) -> Result<(), ProtocolError> {
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(ProtocolError::InsufficientBalance(format!(
                "{}: transfer amount {} exceeds balance {}",
                symbol, amount, from_balance
            )));
        }
        self.set_balance(from, from_balance - amount);
        let to_balance = self.balance_of(&to);
        self.set_balance(to, math::add(to_balance, amount)?);
        Ok(())
    }

    fn set_balance(&mut self, account: Address, amount: Amount) {
        if amount == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, amount);
        }
    }

    /// Accounts holding a non-zero balance.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }
}

/// A mintable fungible token (the reward token, the escrowed reward token,
/// bonus points, the fee token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseToken {
    pub address: Address,
    pub symbol: String,
    governance: Governable,
    balances: Balances,
    minters: HandlerSet,
    handlers: HandlerSet,
    in_private_transfer_mode: bool,
}

impl BaseToken {
    pub fn new(address: Address, symbol: impl Into<String>, gov: Address) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            governance: Governable::new(gov),
            balances: Balances::new(),
            minters: HandlerSet::new(),
            handlers: HandlerSet::new(),
            in_private_transfer_mode: false,
        }
    }

    pub fn gov(&self) -> Address {
        self.governance.gov()
    }

    pub fn set_gov(&mut self, caller: Address, new_gov: Address) -> Result<(), ProtocolError> {
        self.governance.set_gov(caller, new_gov)
    }

    pub fn set_minter(&mut self, caller: Address, minter: Address, allowed: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.minters.set(minter, allowed);
        Ok(())
    }

    pub fn set_handler(&mut self, caller: Address, handler: Address, allowed: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.handlers.set(handler, allowed);
        Ok(())
    }

    pub fn set_in_private_transfer_mode(&mut self, caller: Address, enabled: bool) -> Result<(), ProtocolError> {
        self.governance.ensure_gov(caller)?;
        self.in_private_transfer_mode = enabled;
        Ok(())
    }

    pub fn is_minter(&self, account: &Address) -> bool {
        self.minters.contains(account)
    }

    pub fn is_handler(&self, account: &Address) -> bool {
        self.handlers.contains(account)
    }

    pub fn in_private_transfer_mode(&self) -> bool {
        self.in_private_transfer_mode
    }

    pub fn mint(&mut self, caller: Address, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.minters.ensure(caller, &format!("{} minters", self.symbol))?;
        self.balances.mint(account, amount)
    }

    pub fn burn(&mut self, caller: Address, account: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.minters.ensure(caller, &format!("{} minters", self.symbol))?;
        self.balances.burn(account, amount, &self.symbol)
    }

    /// Burn from the caller's own balance (unwrapping a wrapped asset).
    pub fn burn_own(&mut self, holder: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.balances.burn(holder, amount, &self.symbol)
    }

    /// Mint against deposited backing (wrapping a native asset).
    pub fn mint_backed(&mut self, holder: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.balances.mint(holder, amount)
    }

    fn ensure_transfer_allowed(&self, caller: Address) -> Result<(), ProtocolError> {
        if self.in_private_transfer_mode && !self.handlers.contains(&caller) {
            return Err(ProtocolError::UnauthorizedCaller(format!(
                "{}: transfers are restricted to handlers",
                self.symbol
            )));
        }
        Ok(())
    }
}

impl FungibleToken for BaseToken {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.balance_of(account)
    }

    fn total_supply(&self) -> Amount {
        self.balances.total_supply()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.balances.allowance(owner, spender)
    }

    fn approve(&mut self, owner: Address, spender: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.balances.approve(owner, spender, amount);
        Ok(())
    }

    fn transfer(&mut self, sender: Address, recipient: Address, amount: Amount) -> Result<(), ProtocolError> {
        self.ensure_transfer_allowed(sender)?;
        self.balances.move_balance(sender, recipient, amount, &self.symbol)
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if self.handlers.contains(&spender) {
            return self.balances.move_balance(from, to, amount, &self.symbol);
        }
        self.ensure_transfer_allowed(spender)?;
        self.balances.spend_allowance(from, spender, amount, &self.symbol)?;
        self.balances.move_balance(from, to, amount, &self.symbol)
    }
}

/// Registry of every plain token known to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    tokens: BTreeMap<Address, BaseToken>,
    /// wrapped token -> native token backing it
    wrapped_native: BTreeMap<Address, Address>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new token.
    ///
    /// # Errors
    /// `AlreadyInitialized` if the address is already a token.
    pub fn create_token(
        &mut self,
        address: Address,
        symbol: impl Into<String>,
        gov: Address,
    ) -> Result<&mut BaseToken, ProtocolError> {
        if self.tokens.contains_key(&address) {
            return Err(ProtocolError::AlreadyInitialized(format!(
                "token {} already exists",
                address.short()
            )));
        }
        Ok(self
            .tokens
            .entry(address)
            .or_insert_with(|| BaseToken::new(address, symbol, gov)))
    }

    /// Declare `wrapped` as a 1:1 wrapper of `native`. The wrapped token's own
    /// address holds the native backing.
    pub fn register_wrapped(&mut self, wrapped: Address, native: Address) -> Result<(), ProtocolError> {
        self.get(&wrapped)?;
        self.get(&native)?;
        self.wrapped_native.insert(wrapped, native);
        Ok(())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.tokens.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Result<&BaseToken, ProtocolError> {
        self.tokens
            .get(address)
            .ok_or_else(|| ProtocolError::NotFound(format!("token {}", address.short())))
    }

    pub fn get_mut(&mut self, address: &Address) -> Result<&mut BaseToken, ProtocolError> {
        self.tokens
            .get_mut(address)
            .ok_or_else(|| ProtocolError::NotFound(format!("token {}", address.short())))
    }

    pub fn balance_of(&self, token: &Address, account: &Address) -> Amount {
        self.tokens
            .get(token)
            .map(|t| t.balance_of(account))
            .unwrap_or(0)
    }

    /// Deposit `amount` of the native asset and receive the wrapped token.
    pub fn wrap(&mut self, wrapped: &Address, holder: Address, amount: Amount) -> Result<(), ProtocolError> {
        let native = self.native_of(wrapped)?;
        self.get_mut(&native)?
            .balances
            .move_balance(holder, *wrapped, amount, "native")?;
        self.get_mut(wrapped)?.mint_backed(holder, amount)
    }

    /// Burn `amount` of the wrapped token held by `holder` and release the
    /// native backing to `receiver`.
    pub fn unwrap(
        &mut self,
        wrapped: &Address,
        holder: Address,
        amount: Amount,
        receiver: Address,
    ) -> Result<(), ProtocolError> {
        let native = self.native_of(wrapped)?;
        self.get_mut(wrapped)?.burn_own(holder, amount)?;
        let symbol = self.get(&native)?.symbol.clone();
        self.get_mut(&native)?
            .balances
            .move_balance(*wrapped, receiver, amount, &symbol)
    }

    fn native_of(&self, wrapped: &Address) -> Result<Address, ProtocolError> {
        self.wrapped_native
            .get(wrapped)
            .copied()
            .ok_or_else(|| ProtocolError::NotFound(format!("{} is not a wrapped asset", wrapped.short())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (BaseToken, Address, Address, Address) {
        let gov = Address::from_label("gov");
        let user0 = Address::from_label("user0");
        let user1 = Address::from_label("user1");
        let mut token = BaseToken::new(Address::from_label("UNIP"), "UNIP", gov);
        token.set_minter(gov, gov, true).unwrap();
        token.mint(gov, user0, 1_000).unwrap();
        (token, gov, user0, user1)
    }

    #[test]
    fn test_units_display() {
        assert_eq!(Units(expand_decimals(42, 18)).to_string(), "42");
        assert_eq!(Units(UNIT + UNIT / 2).to_string(), "1.5");
        assert_eq!(Units(0).to_string(), "0");
        assert_eq!(Units(1).to_string(), "0.000000000000000001");
    }

    #[test]
    fn test_units_parse() {
        assert_eq!("42".parse::<Units>().unwrap(), Units(expand_decimals(42, 18)));
        assert_eq!("1.5".parse::<Units>().unwrap(), Units(UNIT + UNIT / 2));
        assert_eq!("0.0206".parse::<Units>().unwrap(), Units(20_600_000_000_000_000));
        assert_eq!(".5".parse::<Units>().unwrap(), Units(UNIT / 2));
        assert!("".parse::<Units>().is_err());
        assert!("1.2.3".parse::<Units>().is_err());
        assert!("-1".parse::<Units>().is_err());
        assert!("0.0000000000000000001".parse::<Units>().is_err());
    }

    #[test]
    fn test_mint_requires_minter() {
        let (mut token, _gov, user0, user1) = setup();
        assert!(matches!(
            token.mint(user0, user1, 1),
            Err(ProtocolError::UnauthorizedCaller(_))
        ));
        assert_eq!(token.total_supply(), 1_000);
    }

    #[test]
    fn test_transfer_and_balance_errors() {
        let (mut token, _gov, user0, user1) = setup();
        token.transfer(user0, user1, 400).unwrap();
        assert_eq!(token.balance_of(&user0), 600);
        assert_eq!(token.balance_of(&user1), 400);
        assert!(matches!(
            token.transfer(user1, user0, 401),
            Err(ProtocolError::InsufficientBalance(_))
        ));
    }

    #[test]
    fn test_transfer_from_requires_allowance_unless_handler() {
        let (mut token, gov, user0, user1) = setup();
        let spender = Address::from_label("spender");
        assert!(matches!(
            token.transfer_from(spender, user0, user1, 10),
            Err(ProtocolError::InsufficientAllowance(_))
        ));
        token.approve(user0, spender, 10).unwrap();
        token.transfer_from(spender, user0, user1, 10).unwrap();
        assert_eq!(token.allowance(&user0, &spender), 0);

        token.set_handler(gov, spender, true).unwrap();
        token.transfer_from(spender, user0, user1, 90).unwrap();
        assert_eq!(token.balance_of(&user1), 100);
    }

    #[test]
    fn test_private_transfer_mode() {
        let (mut token, gov, user0, user1) = setup();
        token.set_in_private_transfer_mode(gov, true).unwrap();
        assert!(token.transfer(user0, user1, 1).is_err());
        token.set_handler(gov, user0, true).unwrap();
        assert!(token.transfer(user0, user1, 1).is_ok());
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let gov = Address::from_label("gov");
        let user = Address::from_label("user");
        let eth = Address::from_label("ETH");
        let weth = Address::from_label("WETH");
        let mut ledger = TokenLedger::new();
        ledger.create_token(eth, "ETH", gov).unwrap();
        ledger.create_token(weth, "WETH", gov).unwrap();
        ledger.register_wrapped(weth, eth).unwrap();
        ledger.get_mut(&eth).unwrap().set_minter(gov, gov, true).unwrap();
        ledger.get_mut(&eth).unwrap().mint(gov, user, 50).unwrap();

        ledger.wrap(&weth, user, 30).unwrap();
        assert_eq!(ledger.balance_of(&weth, &user), 30);
        assert_eq!(ledger.balance_of(&eth, &weth), 30);

        let receiver = Address::from_label("receiver");
        ledger.unwrap(&weth, user, 20, receiver).unwrap();
        assert_eq!(ledger.balance_of(&eth, &receiver), 20);
        assert_eq!(ledger.balance_of(&weth, &user), 10);
        assert!(ledger.unwrap(&weth, user, 11, receiver).is_err());
    }

    #[test]
    fn test_create_token_twice_fails() {
        let gov = Address::from_label("gov");
        let mut ledger = TokenLedger::new();
        ledger.create_token(Address::from_label("A"), "A", gov).unwrap();
        assert!(matches!(
            ledger.create_token(Address::from_label("A"), "A", gov),
            Err(ProtocolError::AlreadyInitialized(_))
        ));
    }
}
