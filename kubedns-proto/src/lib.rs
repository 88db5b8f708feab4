pub mod buffer;
pub mod packet;

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::packet::{
        header::Header, question::Question, record::Record, DnsPacket, QueryType,
    };

    #[test]
    fn should_round_trip_a_query_packet() {
        let mut packet = DnsPacket::new(Header::question(38005))
            .with_question(Question::new("google.com".into(), QueryType::A));

        let mut buffer = packet.create_buffer().unwrap();
        buffer.pos = 0;

        let parsed = DnsPacket::try_from(buffer).unwrap();
        assert_eq!(parsed.header.id, 38005);
        assert!(parsed.header.recursion_desired);
        assert!(!parsed.header.truncated_message);

        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].name, "google.com");
        assert_eq!(parsed.questions[0].qtype, QueryType::A);

        assert!(parsed.answers.is_empty());
        assert!(parsed.authorities.is_empty());
        assert!(parsed.resources.is_empty());
    }

    #[test]
    fn should_round_trip_a_response_packet_with_one_answer() {
        let question = Question::new("google.com".into(), QueryType::A);
        let mut packet = DnsPacket::response_from(38005, question).with_answer(Record::A {
            domain: "google.com".into(),
            addr: Ipv4Addr::new(172, 217, 20, 206),
            ttl: 8,
        });

        let mut buffer = packet.create_buffer().unwrap();
        buffer.pos = 0;

        let parsed = DnsPacket::try_from(buffer).unwrap();
        assert_eq!(parsed.header.id, 38005);
        assert!(parsed.header.response);
        assert!(parsed.header.authoritative_answer);

        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(
            parsed.answers[0],
            Record::A {
                domain: String::from("google.com"),
                addr: Ipv4Addr::new(172, 217, 20, 206),
                ttl: 8,
            }
        );
    }

    #[test]
    fn should_round_trip_a_response_with_compressed_cname_chain() {
        let question = Question::new("app.example.com".into(), QueryType::A);
        let mut packet = DnsPacket::response_from(45838, question).with_answers(vec![
            Record::CNAME {
                domain: "app.example.com".into(),
                host: "alb.us-east-1.elb.example.com".into(),
                ttl: 39,
            },
            Record::A {
                domain: "alb.us-east-1.elb.example.com".into(),
                addr: Ipv4Addr::new(3, 233, 151, 184),
                ttl: 60,
            },
            Record::A {
                domain: "alb.us-east-1.elb.example.com".into(),
                addr: Ipv4Addr::new(3, 233, 150, 239),
                ttl: 60,
            },
        ]);

        let mut buffer = packet.create_buffer().unwrap();
        buffer.pos = 0;

        let parsed = DnsPacket::try_from(buffer).unwrap();
        assert_eq!(parsed.answers.len(), 3);
        assert_eq!(parsed.answers, packet.answers);
    }
}
