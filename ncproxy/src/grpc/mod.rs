//! gRPC surfaces of ncproxy.
//!
//! Both services are thin adapters: they convert wire messages into broker
//! calls and broker errors into `Status`. All routing and ordering lives in
//! [`crate::broker::NetworkConfigBroker`].

pub mod proxy;
pub mod registration;

// Re-export generated protobuf types
pub mod proto {
    pub mod ncproxy {
        tonic::include_proto!("ncproxy.v1");
    }

    pub mod registration {
        tonic::include_proto!("ncproxy.registration.v1");
    }

    pub mod nodenetsvc {
        tonic::include_proto!("nodenetsvc.v1");
    }
}

pub use proxy::NetworkConfigProxyImpl;
pub use registration::RegistrationImpl;
