//! Known chains and their relay contract deployments.
//!
//! Applications assemble a [`ChainRegistry`](crate::chain::ChainRegistry) from
//! [`KNOWN_CHAINS`] at startup, optionally followed by their own entries.

use alloy_primitives::address;

use crate::chain::{ChainDescriptor, ChainId, ChainStatus, ContractBundle, VmKind};

const EVM_ENTRYPOINT_TYPES: &[u8] = &[0, 1];
const EVM_ESCROW_TYPES: &[u8] = &[0, 1, 2];
const TVM_ENTRYPOINT_TYPES: &[u8] = &[2];
const TVM_ESCROW_TYPES: &[u8] = &[0, 1, 2];
const NONE: &[u8] = &[];

const NOT_SUPPORTED: ChainStatus = ChainStatus::Disabled("chain is not supported by the relay");

/// Bitlayer testnet chain ID.
pub const BITLAYER_TESTNET_ID: ChainId = ChainId::new(200_810);

/// Ethereum Holesky chain ID.
pub const ETHEREUM_HOLESKY_ID: ChainId = ChainId::new(17_000);

/// Ethereum Sepolia chain ID.
pub const ETHEREUM_SEPOLIA_ID: ChainId = ChainId::new(11_155_111);

/// Citrea testnet chain ID.
pub const CITREA_TESTNET_ID: ChainId = ChainId::new(62_298);

/// Botanix testnet chain ID.
pub const BOTANIX_TESTNET_ID: ChainId = ChainId::new(3636);

/// TON testnet id in the relay's numeric chain space.
pub const TON_TESTNET_ID: ChainId = ChainId::new(1_667_471_769);

/// Proxy-wallet entrypoint on the TON testnet (user-friendly, bounceable).
pub const TON_TESTNET_ENTRYPOINT: &str = "EQAGJK50PW_a1ZbQWK0yldegu56FlX0nXKQIa7xzoWCzQp78";

const fn evm(
    id: u64,
    name: &'static str,
    contracts: Option<ContractBundle>,
    status: ChainStatus,
) -> ChainDescriptor {
    ChainDescriptor {
        id: ChainId::new(id),
        name,
        vm: VmKind::Evm,
        contracts,
        tvm_entrypoint: None,
        entrypoint_types: EVM_ENTRYPOINT_TYPES,
        escrow_types: EVM_ESCROW_TYPES,
        status,
    }
}

const fn svm(id: u64, name: &'static str) -> ChainDescriptor {
    ChainDescriptor {
        id: ChainId::new(id),
        name,
        vm: VmKind::Svm,
        contracts: None,
        tvm_entrypoint: None,
        entrypoint_types: NONE,
        escrow_types: NONE,
        status: NOT_SUPPORTED,
    }
}

/// Bitlayer testnet.
pub const BITLAYER_TESTNET: ChainDescriptor = evm(
    BITLAYER_TESTNET_ID.get(),
    "bitlayerTestnet",
    Some(ContractBundle {
        entrypoint: address!("317bBdFbAe7845648864348A0C304392d0F2925F"),
        simple_account_factory: address!("CF730748FcDc78A5AB854B898aC24b6d6001AbF7"),
        multicall: address!("66e4f2437c5F612Ae25e94C1C549cb9f151E0cB3"),
        mailbox: address!("2EaAd60F982f7B99b42f30e98B3b3f8ff89C0A46"),
        gas_oracle: address!("16e81e1973939bD166FDc61651F731e1658060F3"),
        paymaster: address!("dAE5e7CEBe4872BF0776477EcCCD2A0eFdF54f0e"),
        escrow_singleton: address!("9925D4a40ea432A25B91ab424b16c8FC6e0Eec5A"),
        escrow_factory: address!("C531388B2C2511FDFD16cD48f1087A747DC34b33"),
    }),
    ChainStatus::Enabled,
);

/// Ethereum Holesky.
pub const ETHEREUM_HOLESKY: ChainDescriptor = evm(
    ETHEREUM_HOLESKY_ID.get(),
    "ethereumHoleskyTestnet",
    Some(ContractBundle {
        entrypoint: address!("c5Ff094002cdaF36d6a766799eB63Ec82B8C79F1"),
        simple_account_factory: address!("39351b719D044CF6E91DEC75E78e5d128c582bE7"),
        multicall: address!("98876409cc48507f8Ee8A0CCdd642469DBfB3E21"),
        mailbox: address!("913A6477496eeb054C9773843a64c8621Fc46e8C"),
        gas_oracle: address!("2Fb9F9bd9034B6A5CAF3eCDB30db818619EbE9f1"),
        paymaster: address!("A5bcda4aA740C02093Ba57A750a8f424BC8B4B13"),
        escrow_singleton: address!("686130A96724734F0B6f99C6D32213BC62C1830A"),
        escrow_factory: address!("45d5D46B097870223fDDBcA9a9eDe35A7D37e2A1"),
    }),
    ChainStatus::Enabled,
);

/// Ethereum Sepolia.
pub const ETHEREUM_SEPOLIA: ChainDescriptor = evm(
    ETHEREUM_SEPOLIA_ID.get(),
    "ethereumSepoliaTestnet",
    Some(ContractBundle {
        entrypoint: address!("A6eBc93dA2C99654e7D6BC12ed24362061805C82"),
        simple_account_factory: address!("54bed3E354cbF23C2CADaB1dF43399473e38a358"),
        multicall: address!("6958206f218D8f889ECBb76B89eE9bF1CAe37715"),
        mailbox: address!("Ac165ff97Dc42d87D858ba8BC4AA27429a8C48e8"),
        gas_oracle: address!("00eb6D45afac57E708eC3FA6214BFe900aFDb95D"),
        paymaster: address!("31aCA626faBd9df61d24A537ecb9D646994b4d4d"),
        escrow_singleton: address!("ea8D264dF67c9476cA80A24067c2F3CF7726aC4d"),
        escrow_factory: address!("d9842E241B7015ea1E1B5A90Ae20b6453ADF2723"),
    }),
    ChainStatus::Enabled,
);

/// Citrea testnet. Served, but no relay contracts are deployed yet.
pub const CITREA_TESTNET: ChainDescriptor = evm(
    CITREA_TESTNET_ID.get(),
    "citreaTestnet",
    None,
    ChainStatus::Enabled,
);

/// Botanix testnet.
pub const BOTANIX_TESTNET: ChainDescriptor = evm(
    BOTANIX_TESTNET_ID.get(),
    "botanixTestnet",
    Some(ContractBundle {
        entrypoint: address!("F7B12fFBC58dd654aeA52f1c863bf3f4731f848F"),
        simple_account_factory: address!("FB23dB8098Faf2dB307110905dC3698Fe27E136d"),
        multicall: address!("6cB50ee0241C7AE6Ebc30A34a9F3C23A96098bBf"),
        mailbox: address!("d2DB8440B7dC1d05aC2366b353f1cF205Cf875EA"),
        gas_oracle: address!("8439DBdca66C9F72725f1B2d50dFCdc7c6CBBbEb"),
        paymaster: address!("bbfb649f42Baf44729a150464CBf6B89349A634a"),
        escrow_singleton: address!("CD77545cA802c4B05ff359f7b10355EC220E7476"),
        escrow_factory: address!("A6eBc93dA2C99654e7D6BC12ed24362061805C82"),
    }),
    ChainStatus::Disabled("relay contracts are paused on this testnet"),
);

/// TON testnet.
pub const TON_TESTNET: ChainDescriptor = ChainDescriptor {
    id: TON_TESTNET_ID,
    name: "tonTvmTestnet",
    vm: VmKind::Tvm,
    contracts: None,
    tvm_entrypoint: Some(TON_TESTNET_ENTRYPOINT),
    entrypoint_types: TVM_ENTRYPOINT_TYPES,
    escrow_types: TVM_ESCROW_TYPES,
    status: ChainStatus::Enabled,
};

/// Every chain the relay knows about, enabled or not.
pub const KNOWN_CHAINS: &[ChainDescriptor] = &[
    BITLAYER_TESTNET,
    ETHEREUM_HOLESKY,
    ETHEREUM_SEPOLIA,
    CITREA_TESTNET,
    BOTANIX_TESTNET,
    TON_TESTNET,
    evm(80_001, "maticMumbai", None, NOT_SUPPORTED),
    evm(80_002, "maticAmoy", None, NOT_SUPPORTED),
    evm(195, "xLayerEvmTestnet", None, NOT_SUPPORTED),
    evm(44_787, "celoAlforesTestnet", None, NOT_SUPPORTED),
    evm(1513, "storyEvmTestnet", None, NOT_SUPPORTED),
    evm(534_351, "scrollEvmTestnet", None, NOT_SUPPORTED),
    evm(11_155_420, "optimismSepoliaTestnet", None, NOT_SUPPORTED),
    evm(421_614, "arbitrumSepoliaTestnet", None, NOT_SUPPORTED),
    evm(84_532, "baseSepoliaTestnet", None, NOT_SUPPORTED),
    evm(314_159, "filecoinEvmTestnet", None, NOT_SUPPORTED),
    evm(48_899, "zircuitTestnet", None, NOT_SUPPORTED),
    svm(357_930_172_418, "solanaSvmDevnet"),
    svm(357_930_172_419, "svmDevnet3"),
    svm(357_930_172_420, "eclipseSvmDevnet"),
];

/// Returns the public JSON-RPC endpoint used when no `rpc_url` is configured.
#[must_use]
pub const fn default_rpc_url(id: ChainId) -> Option<&'static str> {
    match id.get() {
        200_810 => Some("https://testnet-rpc.bitlayer.org"),
        17_000 => Some("https://ethereum-holesky-rpc.publicnode.com"),
        11_155_111 => Some("https://ethereum-sepolia.publicnode.com"),
        62_298 => Some("https://rpc.devnet.citrea.xyz"),
        _ => None,
    }
}
