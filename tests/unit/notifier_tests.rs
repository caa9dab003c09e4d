use agent_relay::models::{DeliveryHandle, ThreadHandle};
use agent_relay::notifier::{
    DeliveryTarget, LocalNotifier, MessageKind, Notifier, OutboundMessage,
};

fn thread() -> ThreadHandle {
    ThreadHandle {
        channel_id: "C1".into(),
        thread_ts: "111.222".into(),
    }
}

#[test]
fn target_follows_thread_presence() {
    assert_eq!(DeliveryTarget::from_thread(None), DeliveryTarget::Channel);
    assert_eq!(
        DeliveryTarget::from_thread(Some(&thread())),
        DeliveryTarget::Thread(thread())
    );
}

#[test]
fn plain_message_has_plain_kind() {
    let message = OutboundMessage::plain("hello");
    assert_eq!(message.kind, MessageKind::Plain);
    assert_eq!(message.text, "hello");
}

#[tokio::test]
async fn local_notifier_reports_local_channel() {
    let notifier = LocalNotifier::new();
    let handle = notifier
        .deliver(DeliveryTarget::Thread(thread()), OutboundMessage::plain("x"))
        .await
        .expect("local delivery never fails");
    assert_eq!(handle.channel_id, LocalNotifier::CHANNEL);
}

#[tokio::test]
async fn local_notifier_accepts_updates() {
    let notifier = LocalNotifier::new();
    let handle = DeliveryHandle {
        channel_id: "local".into(),
        message_ts: "local-1".into(),
    };
    notifier
        .update(
            handle,
            OutboundMessage::new("done", MessageKind::QuestionAnswered),
        )
        .await
        .expect("update succeeds");
}
