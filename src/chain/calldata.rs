//! ABI bindings for the curve token contract.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    #[sol(rpc)]
    contract ICurveToken {
        function getReserves() external view returns (uint256 currentEthReserve, uint256 currentTokenReserve);
        function getCurrentPrice() external view returns (uint256);
        function getEstimatedTokensForETH(uint256 ethAmount) external view returns (uint256 tokenAmount);
        function getEstimatedETHForTokens(uint256 tokenAmount) external view returns (uint256 ethAmount);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function buyTokens(uint256 minTokenAmount) external payable;
        function sellTokens(uint256 tokenAmount, uint256 minEthAmount) external;
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// `buyTokens(minTokenAmount)`; the ETH amount travels as the tx value.
pub fn buy_tokens(min_token_amount: U256) -> Bytes {
    ICurveToken::buyTokensCall {
        minTokenAmount: min_token_amount,
    }
    .abi_encode()
    .into()
}

/// `sellTokens(tokenAmount, minEthAmount)`.
pub fn sell_tokens(token_amount: U256, min_eth_amount: U256) -> Bytes {
    ICurveToken::sellTokensCall {
        tokenAmount: token_amount,
        minEthAmount: min_eth_amount,
    }
    .abi_encode()
    .into()
}

/// `approve(spender, amount)`.
pub fn approve(spender: Address, amount: U256) -> Bytes {
    ICurveToken::approveCall { spender, amount }.abi_encode().into()
}
