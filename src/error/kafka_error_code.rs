//! Kafka protocol error codes used by the consumer core

/// Kafka protocol error codes
/// See: <https://kafka.apache.org/protocol.html#protocol_error_codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum KafkaErrorCode {
    /// No error
    None = 0,
    /// Unknown server error
    UnknownServerError = -1,
    /// The requested offset is outside the range of offsets
    OffsetOutOfRange = 1,
    /// Message failed its CRC check or is otherwise corrupt
    CorruptMessage = 2,
    /// Unknown topic or partition
    UnknownTopicOrPartition = 3,
    /// Invalid message size
    InvalidMessageSize = 4,
    /// Leader not available
    LeaderNotAvailable = 5,
    /// Not leader for partition
    NotLeaderOrFollower = 6,
    /// Request timed out
    RequestTimedOut = 7,
    /// Broker not available
    BrokerNotAvailable = 8,
    /// Replica not available
    ReplicaNotAvailable = 9,
    /// Message too large
    MessageTooLarge = 10,
    /// Stale controller epoch
    StaleControllerEpoch = 11,
    /// Offset metadata string too large
    OffsetMetadataTooLarge = 12,
    /// Network exception while the server was processing the request
    NetworkException = 13,
    /// Coordinator load in progress
    CoordinatorLoadInProgress = 14,
    /// Coordinator not available
    CoordinatorNotAvailable = 15,
    /// Not coordinator for group
    NotCoordinator = 16,
    /// Invalid topic
    InvalidTopicException = 17,
    /// Batch larger than max configured size
    RecordListTooLarge = 18,
    /// Not enough in-sync replicas
    NotEnoughReplicas = 19,
    /// Not enough in-sync replicas after append
    NotEnoughReplicasAfterAppend = 20,
    /// Invalid required acks
    InvalidRequiredAcks = 21,
    /// Illegal generation
    IllegalGeneration = 22,
    /// Inconsistent group protocol
    InconsistentGroupProtocol = 23,
    /// Invalid group id
    InvalidGroupId = 24,
    /// Unknown member
    UnknownMemberId = 25,
    /// Invalid session timeout
    InvalidSessionTimeout = 26,
    /// Rebalance in progress
    RebalanceInProgress = 27,
    /// Invalid commit offset size
    InvalidCommitOffsetSize = 28,
    /// Topic authorization failed
    TopicAuthorizationFailed = 29,
    /// Group authorization failed
    GroupAuthorizationFailed = 30,
    /// Cluster authorization failed
    ClusterAuthorizationFailed = 31,
    /// Invalid timestamp
    InvalidTimestamp = 32,
    /// Unsupported SASL mechanism
    UnsupportedSaslMechanism = 33,
    /// Illegal SASL state
    IllegalSaslState = 34,
    /// Unsupported version
    UnsupportedVersion = 35,
    /// Topic already exists
    TopicAlreadyExists = 36,
    /// Invalid partitions
    InvalidPartitions = 37,
    /// Invalid replication factor
    InvalidReplicationFactor = 38,
    /// Invalid replica assignment
    InvalidReplicaAssignment = 39,
    /// Invalid config
    InvalidConfig = 40,
    /// Not controller
    NotController = 41,
    /// Invalid request
    InvalidRequest = 42,
    /// Unsupported for message format
    UnsupportedForMessageFormat = 43,
    /// Policy violation
    PolicyViolation = 44,
    /// Disk error when trying to access the log file
    KafkaStorageError = 56,
    /// Log directory not found
    LogDirNotFound = 57,
    /// SASL authentication failed
    SaslAuthenticationFailed = 58,
    /// Unknown producer id
    UnknownProducerId = 59,
    /// Reassignment in progress
    ReassignmentInProgress = 60,
    /// Fetch session id not found
    FetchSessionIdNotFound = 70,
    /// Invalid fetch session epoch
    InvalidFetchSessionEpoch = 71,
    /// No listener on the leader matching the listener the client connected on
    ListenerNotFound = 72,
    /// Topic deletion disabled
    TopicDeletionDisabled = 73,
    /// The leader epoch in the request is older than the epoch on the broker
    FencedLeaderEpoch = 74,
    /// The leader epoch in the request is newer than the epoch on the broker
    UnknownLeaderEpoch = 75,
    /// Unsupported compression type
    UnsupportedCompressionType = 76,
    /// Stale broker epoch
    StaleBrokerEpoch = 77,
    /// The leader high watermark has not caught up from a recent election
    OffsetNotAvailable = 78,
    /// Member id required
    MemberIdRequired = 79,
    /// Preferred leader not available
    PreferredLeaderNotAvailable = 80,
    /// Group max size reached
    GroupMaxSizeReached = 81,
    /// Fenced instance id
    FencedInstanceId = 82,
    /// Eligible leaders are not available
    EligibleLeadersNotAvailable = 83,
    /// Leader election not needed
    ElectionNotNeeded = 84,
    /// Unstable offset commit
    UnstableOffsetCommit = 88,
    /// Throttling quota exceeded
    ThrottlingQuotaExceeded = 89,
    /// Producer fenced
    ProducerFenced = 90,
    /// Unknown topic id
    UnknownTopicId = 100,
    /// Inconsistent topic id
    InconsistentTopicId = 103,
}

impl KafkaErrorCode {
    /// Map a wire error code to a known code, collapsing anything
    /// unrecognized to `UnknownServerError`.
    pub fn from_code(code: i16) -> KafkaErrorCode {
        match code {
            0 => KafkaErrorCode::None,
            1 => KafkaErrorCode::OffsetOutOfRange,
            2 => KafkaErrorCode::CorruptMessage,
            3 => KafkaErrorCode::UnknownTopicOrPartition,
            4 => KafkaErrorCode::InvalidMessageSize,
            5 => KafkaErrorCode::LeaderNotAvailable,
            6 => KafkaErrorCode::NotLeaderOrFollower,
            7 => KafkaErrorCode::RequestTimedOut,
            8 => KafkaErrorCode::BrokerNotAvailable,
            9 => KafkaErrorCode::ReplicaNotAvailable,
            10 => KafkaErrorCode::MessageTooLarge,
            11 => KafkaErrorCode::StaleControllerEpoch,
            12 => KafkaErrorCode::OffsetMetadataTooLarge,
            13 => KafkaErrorCode::NetworkException,
            14 => KafkaErrorCode::CoordinatorLoadInProgress,
            15 => KafkaErrorCode::CoordinatorNotAvailable,
            16 => KafkaErrorCode::NotCoordinator,
            17 => KafkaErrorCode::InvalidTopicException,
            18 => KafkaErrorCode::RecordListTooLarge,
            19 => KafkaErrorCode::NotEnoughReplicas,
            20 => KafkaErrorCode::NotEnoughReplicasAfterAppend,
            21 => KafkaErrorCode::InvalidRequiredAcks,
            22 => KafkaErrorCode::IllegalGeneration,
            23 => KafkaErrorCode::InconsistentGroupProtocol,
            24 => KafkaErrorCode::InvalidGroupId,
            25 => KafkaErrorCode::UnknownMemberId,
            26 => KafkaErrorCode::InvalidSessionTimeout,
            27 => KafkaErrorCode::RebalanceInProgress,
            28 => KafkaErrorCode::InvalidCommitOffsetSize,
            29 => KafkaErrorCode::TopicAuthorizationFailed,
            30 => KafkaErrorCode::GroupAuthorizationFailed,
            31 => KafkaErrorCode::ClusterAuthorizationFailed,
            32 => KafkaErrorCode::InvalidTimestamp,
            33 => KafkaErrorCode::UnsupportedSaslMechanism,
            34 => KafkaErrorCode::IllegalSaslState,
            35 => KafkaErrorCode::UnsupportedVersion,
            36 => KafkaErrorCode::TopicAlreadyExists,
            37 => KafkaErrorCode::InvalidPartitions,
            38 => KafkaErrorCode::InvalidReplicationFactor,
            39 => KafkaErrorCode::InvalidReplicaAssignment,
            40 => KafkaErrorCode::InvalidConfig,
            41 => KafkaErrorCode::NotController,
            42 => KafkaErrorCode::InvalidRequest,
            43 => KafkaErrorCode::UnsupportedForMessageFormat,
            44 => KafkaErrorCode::PolicyViolation,
            56 => KafkaErrorCode::KafkaStorageError,
            57 => KafkaErrorCode::LogDirNotFound,
            58 => KafkaErrorCode::SaslAuthenticationFailed,
            59 => KafkaErrorCode::UnknownProducerId,
            60 => KafkaErrorCode::ReassignmentInProgress,
            70 => KafkaErrorCode::FetchSessionIdNotFound,
            71 => KafkaErrorCode::InvalidFetchSessionEpoch,
            72 => KafkaErrorCode::ListenerNotFound,
            73 => KafkaErrorCode::TopicDeletionDisabled,
            74 => KafkaErrorCode::FencedLeaderEpoch,
            75 => KafkaErrorCode::UnknownLeaderEpoch,
            76 => KafkaErrorCode::UnsupportedCompressionType,
            77 => KafkaErrorCode::StaleBrokerEpoch,
            78 => KafkaErrorCode::OffsetNotAvailable,
            79 => KafkaErrorCode::MemberIdRequired,
            80 => KafkaErrorCode::PreferredLeaderNotAvailable,
            81 => KafkaErrorCode::GroupMaxSizeReached,
            82 => KafkaErrorCode::FencedInstanceId,
            83 => KafkaErrorCode::EligibleLeadersNotAvailable,
            84 => KafkaErrorCode::ElectionNotNeeded,
            88 => KafkaErrorCode::UnstableOffsetCommit,
            89 => KafkaErrorCode::ThrottlingQuotaExceeded,
            90 => KafkaErrorCode::ProducerFenced,
            100 => KafkaErrorCode::UnknownTopicId,
            103 => KafkaErrorCode::InconsistentTopicId,
            _ => KafkaErrorCode::UnknownServerError,
        }
    }

    /// Returns true if this error is retriable.
    ///
    /// A retriable per-partition error causes the consumer core to re-enqueue
    /// the offset load for the next resolution cycle rather than surfacing the
    /// error to the user.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KafkaErrorCode::CorruptMessage
                | KafkaErrorCode::UnknownTopicOrPartition
                | KafkaErrorCode::LeaderNotAvailable
                | KafkaErrorCode::NotLeaderOrFollower
                | KafkaErrorCode::RequestTimedOut
                | KafkaErrorCode::ReplicaNotAvailable
                | KafkaErrorCode::NetworkException
                | KafkaErrorCode::CoordinatorLoadInProgress
                | KafkaErrorCode::CoordinatorNotAvailable
                | KafkaErrorCode::NotCoordinator
                | KafkaErrorCode::NotEnoughReplicas
                | KafkaErrorCode::NotEnoughReplicasAfterAppend
                | KafkaErrorCode::KafkaStorageError
                | KafkaErrorCode::FetchSessionIdNotFound
                | KafkaErrorCode::InvalidFetchSessionEpoch
                | KafkaErrorCode::ListenerNotFound
                | KafkaErrorCode::FencedLeaderEpoch
                | KafkaErrorCode::UnknownLeaderEpoch
                | KafkaErrorCode::OffsetNotAvailable
                | KafkaErrorCode::PreferredLeaderNotAvailable
                | KafkaErrorCode::EligibleLeadersNotAvailable
                | KafkaErrorCode::ElectionNotNeeded
                | KafkaErrorCode::UnstableOffsetCommit
                | KafkaErrorCode::ThrottlingQuotaExceeded
                | KafkaErrorCode::UnknownTopicId
                | KafkaErrorCode::InconsistentTopicId
        )
    }

    /// Convert to the i16 error code used in the Kafka protocol
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

impl std::fmt::Display for KafkaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, self.as_i16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_roundtrip() {
        for code in [0, 1, 3, 6, 9, 35, 74, 75, 89, 100] {
            assert_eq!(KafkaErrorCode::from_code(code).as_i16(), code);
        }
    }

    #[test]
    fn test_from_code_unknown_collapses() {
        assert_eq!(
            KafkaErrorCode::from_code(32000),
            KafkaErrorCode::UnknownServerError
        );
        assert_eq!(
            KafkaErrorCode::from_code(-1),
            KafkaErrorCode::UnknownServerError
        );
    }

    #[test]
    fn test_is_retriable() {
        // Retriable errors
        assert!(KafkaErrorCode::NotLeaderOrFollower.is_retriable());
        assert!(KafkaErrorCode::UnknownTopicOrPartition.is_retriable());
        assert!(KafkaErrorCode::FencedLeaderEpoch.is_retriable());
        assert!(KafkaErrorCode::UnknownLeaderEpoch.is_retriable());
        assert!(KafkaErrorCode::RequestTimedOut.is_retriable());

        // Non-retriable errors
        assert!(!KafkaErrorCode::OffsetOutOfRange.is_retriable());
        assert!(!KafkaErrorCode::TopicAuthorizationFailed.is_retriable());
        assert!(!KafkaErrorCode::SaslAuthenticationFailed.is_retriable());
        assert!(!KafkaErrorCode::InvalidRequest.is_retriable());
        assert!(!KafkaErrorCode::None.is_retriable());
    }
}
