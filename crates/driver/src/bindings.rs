use ethers::prelude::abigen;

// Generates the bindings for the `EdgeChallengeManager` contract.
abigen!(
    EdgeChallengeManager,
    r#"[
        {"type":"event","name":"EdgeAdded","inputs":[{"name":"edgeId","type":"bytes32","indexed":true},{"name":"mutualId","type":"bytes32","indexed":true},{"name":"originId","type":"bytes32","indexed":true},{"name":"claimId","type":"bytes32","indexed":false},{"name":"length","type":"uint256","indexed":false},{"name":"level","type":"uint8","indexed":false},{"name":"hasRival","type":"bool","indexed":false},{"name":"isLayerZero","type":"bool","indexed":false}],"anonymous":false},
        {"type":"event","name":"EdgeConfirmedByOneStepProof","inputs":[{"name":"edgeId","type":"bytes32","indexed":true},{"name":"mutualId","type":"bytes32","indexed":true}],"anonymous":false},
        {"type":"event","name":"EdgeConfirmedByTime","inputs":[{"name":"edgeId","type":"bytes32","indexed":true},{"name":"mutualId","type":"bytes32","indexed":true},{"name":"totalTimeUnrivaled","type":"uint256","indexed":false}],"anonymous":false},
        {"type":"function","name":"edgeExists","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"view"},
        {"type":"function","name":"getEdge","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"tuple","components":[{"name":"","type":"bytes32"},{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"bytes32"},{"name":"","type":"bytes32"},{"name":"","type":"bytes32"},{"name":"","type":"address"},{"name":"","type":"uint64"},{"name":"","type":"uint64"},{"name":"","type":"uint8"},{"name":"","type":"uint8"},{"name":"","type":"bool"},{"name":"","type":"uint64"}]}],"stateMutability":"view"},
        {"type":"function","name":"getPrevAssertionHash","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"bytes32"}],"stateMutability":"view"},
        {"type":"function","name":"hasRival","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"view"},
        {"type":"function","name":"hasLengthOneRival","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"view"},
        {"type":"function","name":"timeUnrivaled","inputs":[{"name":"edgeId","type":"bytes32"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"challengePeriodBlocks","inputs":[],"outputs":[{"name":"","type":"uint64"}],"stateMutability":"view"},
        {"type":"function","name":"NUM_BIGSTEP_LEVEL","inputs":[],"outputs":[{"name":"","type":"uint8"}],"stateMutability":"view"},
        {"type":"function","name":"LAYERZERO_BLOCKEDGE_HEIGHT","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"LAYERZERO_BIGSTEPEDGE_HEIGHT","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"LAYERZERO_SMALLSTEPEDGE_HEIGHT","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"createLayerZeroEdge","inputs":[{"name":"args","type":"tuple","components":[{"name":"","type":"uint8"},{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"bytes32"},{"name":"","type":"bytes"},{"name":"","type":"bytes"}]}],"outputs":[{"name":"","type":"bytes32"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"bisectEdge","inputs":[{"name":"edgeId","type":"bytes32"},{"name":"bisectionHistoryRoot","type":"bytes32"},{"name":"prefixProof","type":"bytes"}],"outputs":[{"name":"","type":"bytes32"},{"name":"","type":"bytes32"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"confirmEdgeByOneStepProof","inputs":[{"name":"edgeId","type":"bytes32"},{"name":"oneStepData","type":"tuple","components":[{"name":"","type":"bytes32"},{"name":"","type":"bytes"}]},{"name":"prevConfig","type":"tuple","components":[{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"address"},{"name":"","type":"uint64"},{"name":"","type":"uint64"}]},{"name":"beforeHistoryInclusionProof","type":"bytes32[]"},{"name":"afterHistoryInclusionProof","type":"bytes32[]"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"confirmEdgeByTime","inputs":[{"name":"edgeId","type":"bytes32"},{"name":"claimStateData","type":"tuple","components":[{"name":"","type":"tuple","components":[{"name":"","type":"tuple","components":[{"name":"","type":"bytes32[2]"},{"name":"","type":"uint64[2]"}]},{"name":"","type":"uint8"}]},{"name":"","type":"bytes32"},{"name":"","type":"bytes32"}]}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"multiUpdateTimeCacheByChildren","inputs":[{"name":"edgeIds","type":"bytes32[]"},{"name":"maximumCachedTime","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
    ]"#
);

// Generates the bindings for the `RollupUserLogic` contract. `AssertionCreated` logs are decoded
// in `eth`.
abigen!(
    RollupUserLogic,
    r#"[
        {"type":"function","name":"latestConfirmed","inputs":[],"outputs":[{"name":"","type":"bytes32"}],"stateMutability":"view"},
        {"type":"function","name":"getAssertion","inputs":[{"name":"assertionHash","type":"bytes32"}],"outputs":[{"name":"","type":"tuple","components":[{"name":"","type":"uint64"},{"name":"","type":"uint64"},{"name":"","type":"uint64"},{"name":"","type":"bool"},{"name":"","type":"uint8"},{"name":"","type":"bytes32"}]}],"stateMutability":"view"},
        {"type":"function","name":"challengeGracePeriodBlocks","inputs":[],"outputs":[{"name":"","type":"uint64"}],"stateMutability":"view"},
        {"type":"function","name":"challengeManager","inputs":[],"outputs":[{"name":"","type":"address"}],"stateMutability":"view"},
        {"type":"function","name":"confirmAssertion","inputs":[{"name":"assertionHash","type":"bytes32"},{"name":"prevAssertionHash","type":"bytes32"},{"name":"confirmState","type":"tuple","components":[{"name":"","type":"tuple","components":[{"name":"","type":"bytes32[2]"},{"name":"","type":"uint64[2]"}]},{"name":"","type":"uint8"},{"name":"","type":"bytes32"}]},{"name":"winningEdgeId","type":"bytes32"},{"name":"prevConfig","type":"tuple","components":[{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"address"},{"name":"","type":"uint64"},{"name":"","type":"uint64"}]},{"name":"inboxAcc","type":"bytes32"}],"outputs":[],"stateMutability":"nonpayable"}
    ]"#
);
