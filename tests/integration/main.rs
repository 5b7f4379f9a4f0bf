// Integration tests: end-to-end scenarios over the in-process broker, and
// the same operations against a real RabbitMQ (ignored by default).

mod live_broker;
mod memory_broker;
