// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Golden-body tests: every fixture contract must compile to a byte-exact,
//! published program. The unit under test is the last contract of each
//! file, as imports are prepended.

use std::path::PathBuf;

use covenant::{compile, digest, DirResolver};

fn contracts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("contracts")
}

fn compile_fixture(name: &str) -> Vec<covenant::CompiledContract> {
    let src = std::fs::read(contracts_dir().join(name)).unwrap();
    let mut resolver = DirResolver::new(contracts_dir());
    compile(&src, &mut resolver).unwrap()
}

const CASES: &[(&str, &str)] = &[
    (
        "LockPosition",
        "cd9f697b7bae7cac6900c3c251547ac1",
    ),
    (
        "RepayCollateral",
        "557a641f0000007bcda069007b7b51547ac16951c3c251547ac1632a0000007bcd9f6900c3c251567ac1",
    ),
    (
        "LoanCollateral",
        "567a64650000007bcda06900c3537ac2547a5100597989587a89577a89557a89537a8901747e2a557a641f0000007bcda069007b7b51547ac16951c3c251547ac1632a0000007bcd9f6900c3c251567ac189008901c07ec16951c3c251547ac163700000007bcd9f6900c3c251577ac1",
    ),
    (
        "FixedLimitCollect",
        "597a642f0200005479cda069c35b797ca153795579a19a695a790400e1f5059653790400e1f505967c00a07c00a09a69c35b797c9f9161644d010000005b79c2547951005e79895d79895c79895b7989597989587989537a894caa587a649e0000005479cd9f6959790400e1f5059653790400e1f505967800a07800a09a5c7956799f9a6955797b957c96c37800a052797ba19a69c3787c9f91616487000000005b795479515b79c1695178c2515d79c16952c3527994c251005d79895c79895b79895a79895979895879895779895679890274787e008901c07ec1696399000000005b795479515b79c16951c3c2515d79c16963aa000000557acd9f69577a577aae7cac890274787e008901c07ec169515b79c2515d79c16952c35c7994c251005d79895c79895b79895a79895979895879895779895679895579890274787e008901c07ec169632a020000005b79c2547951005e79895d79895c79895b7989597989587989537a894caa587a649e0000005479cd9f6959790400e1f5059653790400e1f505967800a07800a09a5c7956799f9a6955797b957c96c37800a052797ba19a69c3787c9f91616487000000005b795479515b79c1695178c2515d79c16952c3527994c251005d79895c79895b79895a79895979895879895779895679890274787e008901c07ec1696399000000005b795479515b79c16951c3c2515d79c16963aa000000557acd9f69577a577aae7cac890274787e008901c07ec16951c3c2515d79c169633b020000547acd9f69587a587aae7cac",
    ),
    (
        "FixedLimitProfit",
        "587a649e0000005479cd9f6959790400e1f5059653790400e1f505967800a07800a09a5c7956799f9a6955797b957c96c37800a052797ba19a69c3787c9f91616487000000005b795479515b79c1695178c2515d79c16952c3527994c251005d79895c79895b79895a79895979895879895779895679890274787e008901c07ec1696399000000005b795479515b79c16951c3c2515d79c16963aa000000557acd9f69577a577aae7cac",
    ),
];

#[test]
fn compile_contract_fixtures() {
    for (name, want) in CASES {
        let contracts = compile_fixture(name);
        let contract = contracts.last().unwrap();
        let got = hex::encode(&contract.body);
        assert_eq!(&got, want, "{name}");
    }
}

#[test]
fn recompilation_is_byte_identical() {
    let a = compile_fixture("FixedLimitCollect");
    let b = compile_fixture("FixedLimitCollect");
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.body, y.body, "{}", x.name);
    }
}

#[test]
fn imported_bodies_are_inlined() {
    let loan = compile_fixture("LoanCollateral");
    let repay = &loan[0];
    assert_eq!(repay.name, "RepayCollateral");
    let outer = hex::encode(&loan[1].body);
    assert!(outer.contains(&hex::encode(&repay.body)));

    let collect = compile_fixture("FixedLimitCollect");
    let profit = &collect[0];
    assert_eq!(profit.name, "FixedLimitProfit");
    assert!(hex::encode(&collect[1].body).contains(&hex::encode(&profit.body)));
}

#[test]
fn address_is_stable() {
    let contracts = compile_fixture("LockPosition");
    let c = contracts.last().unwrap();
    assert_eq!(c.address(), digest::program_address(&c.body));
    assert_eq!(c.address(), compile_fixture("LockPosition").last().unwrap().address());
}

#[test]
fn missing_import_file() {
    let err = compile(
        b"import \"./DoesNotExist\"\ncontract T() locks a of b { clause c() { unlock a of b } }",
        &mut DirResolver::new(contracts_dir()),
    )
    .unwrap_err();
    assert_eq!(err.kind, covenant::ErrorKind::Import);
}
